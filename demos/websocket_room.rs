//! # WebSocket Room Example
//!
//! Joins a Kingdoms room over WebSocket and logs what happens:
//!
//! 1. Connect to `<ws-base>/ws/rooms/<room>/` and authenticate
//! 2. Pick the first free lobby color and mark the player ready
//! 3. Log board updates until the room fails or Ctrl+C is pressed
//!
//! ## Running
//!
//! ```sh
//! KINGDOMS_WS_BASE_URL=ws://localhost:8000 \
//! KINGDOMS_TOKEN=<access token> \
//! KINGDOMS_USER_ID=7 KINGDOMS_USERNAME=ann \
//!     cargo run --example websocket_room -- <room-id>
//! ```

use std::time::Duration;

use kingdoms_room_client::{
    ConnectionEvent, Identity, Phase, RoomClient, RoomConfig, ServerMessage, Session, StaticToken,
    WebSocketConnector, PALETTE,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = RoomConfig::from_env()?.with_reconnect_delay(Duration::from_millis(500));
    let room_id = std::env::args().nth(1).ok_or("usage: websocket_room <room-id>")?;
    let user_id: i64 = std::env::var("KINGDOMS_USER_ID")?.parse()?;
    let username = std::env::var("KINGDOMS_USERNAME")?;
    let token = std::env::var("KINGDOMS_TOKEN")?;

    let session = Session::new(Identity::new(user_id, username), StaticToken::new(token));
    let connector = WebSocketConnector::new().with_connect_timeout(Duration::from_secs(10));
    let mut client = RoomClient::open(connector, &config, session, room_id);

    // ── Event loop ──────────────────────────────────────────────────
    let mut color_picked = false;
    loop {
        tokio::select! {
            event = client.next_event() => {
                let Some(event) = event else {
                    tracing::info!("connection task ended");
                    break;
                };
                match &event {
                    ConnectionEvent::Message(ServerMessage::Players { .. })
                        if client.phase() == Phase::Config && !color_picked =>
                    {
                        let roster = client.roster();
                        let free = (0..PALETTE.len())
                            .filter_map(|index| u8::try_from(index).ok())
                            .find(|color| !roster.color_taken(*color));
                        if let Some(color) = free {
                            client.select_color(color)?;
                            client.ready()?;
                            client.announce_ready()?;
                            color_picked = true;
                            tracing::info!("picked color {}", PALETTE.get(usize::from(color)).unwrap_or(&"?"));
                        }
                    }
                    ConnectionEvent::Message(ServerMessage::Update(_)) => {
                        if let Some(board) = client.board() {
                            let cursor = board.cursor.map(|c| c.label()).unwrap_or_else(|| "-".into());
                            tracing::info!(
                                "turn {}: {} fields, power {}, cursor {cursor}",
                                board.turn,
                                board.stat.1.fields,
                                board.stat.1.power
                            );
                        }
                    }
                    ConnectionEvent::Message(ServerMessage::Chat(chat)) => {
                        tracing::info!("<{}> {}", chat.username, chat.message);
                    }
                    ConnectionEvent::Failed(category) => {
                        tracing::error!("room failed: {category} ({})", category.description());
                        break;
                    }
                    ConnectionEvent::Closed => break,
                    other => tracing::debug!("event: {other:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving the room");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    client.close().await;
    tracing::info!("final phase: {}", client.phase());
    Ok(())
}
