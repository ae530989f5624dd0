#![no_main]

use kingdoms_room_client::protocol::{self, ServerMessage};
use kingdoms_room_client::room::RoomStateMachine;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    let _ = serde_json::from_slice::<ServerMessage>(data);

    // Frames that decode must also apply cleanly in every phase.
    if let Ok(frame) = std::str::from_utf8(data) {
        if let Ok(message) = protocol::decode(frame) {
            let room = RoomStateMachine::new();
            room.apply(message.clone());
            room.apply(ServerMessage::Auth { status: None });
            room.apply(ServerMessage::Start);
            room.apply(message);
        }
    }
});
