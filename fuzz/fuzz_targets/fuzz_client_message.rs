#![no_main]

use kingdoms_room_client::protocol::{encode, ClientMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that parses as a client message must encode and parse back
    // to the same value.
    if let Ok(message) = serde_json::from_slice::<ClientMessage>(data) {
        let Ok(frame) = encode(&message) else {
            return;
        };
        let reparsed: Result<ClientMessage, _> = serde_json::from_str(&frame);
        assert_eq!(reparsed.ok(), Some(message));
    }
});
