//! Integration-style room tests for the Kingdoms room client.
//!
//! Uses the shared `MockConnector` from `tests/common` to play the server
//! side of each connection and verifies that `RoomClient` walks the room
//! phases, reconnects within bounds, and sends the right intents.

mod common;

use std::time::Duration;

use kingdoms_room_client::protocol::ClientMessage;
use kingdoms_room_client::{
    ConnectionEvent, Cursor, Direction, ErrorCategory, InputEvent, KingdomsError, Phase,
    RoomClient,
};
use serde_json::json;

use common::{
    auth_json, chat_json, config, player_json, players_json, session, update_json, MockConnector,
    ServerHandle, ME,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

const KING: Cursor = Cursor { row: 1, col: 1 };

/// Open a client against a single prepared connection.
fn open_client() -> (RoomClient, ServerHandle, MockConnector) {
    let connector = MockConnector::new();
    let server = connector.expect_connection();
    let client = RoomClient::open(connector.clone(), &config(), session(), "room-1");
    (client, server, connector)
}

/// Process events until one matches `pred`; returns it.
async fn wait_for(
    client: &mut RoomClient,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("connection task ended");
        if pred(&event) {
            return event;
        }
    }
}

/// Complete the handshake: the client reaches the lobby.
async fn enter_lobby(client: &mut RoomClient, server: &mut ServerHandle) {
    assert!(matches!(
        server.next_message().await,
        ClientMessage::Auth { .. }
    ));
    server.push(auth_json());
    wait_for(client, |e| matches!(e, ConnectionEvent::Message(_))).await;
    assert_eq!(client.phase(), Phase::Config);
}

/// Lobby, start, and the first board with the cursor on my king.
async fn enter_game(client: &mut RoomClient, server: &mut ServerHandle) {
    enter_lobby(client, server).await;
    server.push(json!({"at": "start"}));
    server.push(update_json(1, 5, Some((1, 1)), None));
    wait_for(client, |_| true).await;
    wait_for(client, |_| true).await;
    assert_eq!(client.phase(), Phase::Active);
    assert_eq!(client.cursor(), Some(KING));
}

/// Drive the client until the connection task ends; returns the last event.
async fn run_to_end(client: &mut RoomClient) -> Option<ConnectionEvent> {
    let mut last = None;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("timed out waiting for the connection to end")
    {
        last = Some(event);
    }
    last
}

// ════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connects_to_room_url_and_sends_auth_first() {
    let (mut client, mut server, connector) = open_client();

    let auth = server.next_json().await;
    assert_eq!(auth, json!({"at": "auth", "token": "access-token"}));
    assert_eq!(
        connector.urls(),
        vec!["ws://rooms.test/ws/rooms/room-1/?user_id=1&username=ann".to_string()]
    );
    assert_eq!(client.phase(), Phase::Connecting);

    server.push(auth_json());
    wait_for(&mut client, |e| matches!(e, ConnectionEvent::Message(_))).await;
    assert_eq!(client.phase(), Phase::Config);
    assert!(client.is_authenticated());

    client.close().await;
}

#[tokio::test]
async fn intents_wait_for_auth_ack() {
    let (mut client, mut server, _connector) = open_client();
    let _ = server.next_message().await; // auth

    assert!(matches!(client.ready(), Err(KingdomsError::NotConnected)));
    assert!(server.nothing_sent());

    client.close().await;
}

// ════════════════════════════════════════════════════════════════════
// Close codes
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn room_full_is_terminal() {
    let (mut client, server, connector) = open_client();
    server.close_with(4010);

    let last = run_to_end(&mut client).await;
    assert_eq!(last, Some(ConnectionEvent::Failed(ErrorCategory::RoomFull)));
    assert_eq!(client.phase(), Phase::Error(ErrorCategory::RoomFull));
    assert_eq!(client.phase().error().unwrap().label(), "room full");
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn close_code_table() {
    let cases = [
        (4020, ErrorCategory::GameAlreadyStarted),
        (4030, ErrorCategory::AuthorizationFailure),
        (4031, ErrorCategory::AuthorizationFailure),
        (4040, ErrorCategory::RoomNotFound),
        (5000, ErrorCategory::InternalServerError),
        (4100, ErrorCategory::UnknownError),
        (1000, ErrorCategory::UnknownError),
    ];
    for (code, expected) in cases {
        let (mut client, mut server, connector) = open_client();
        enter_lobby(&mut client, &mut server).await;
        server.close_with(code);

        run_to_end(&mut client).await;
        assert_eq!(client.phase(), Phase::Error(expected), "close code {code}");
        assert_eq!(connector.connects(), 1, "close code {code} must not retry");
    }
}

#[tokio::test]
async fn transport_error_is_connectivity_failure() {
    let (mut client, server, _connector) = open_client();
    server.fail("connection reset");

    run_to_end(&mut client).await;
    assert_eq!(client.phase(), Phase::Error(ErrorCategory::Connectivity));
}

// ════════════════════════════════════════════════════════════════════
// Reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transient_close_reconnects_and_reauthenticates() {
    let connector = MockConnector::new();
    let mut first = connector.expect_connection();
    let mut second = connector.expect_connection();
    let mut client = RoomClient::open(connector.clone(), &config(), session(), "room-1");

    enter_lobby(&mut client, &mut first).await;
    first.close_with(1008);

    let event = wait_for(&mut client, |e| {
        matches!(e, ConnectionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        event,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            max_attempts: 10
        }
    );
    assert_eq!(client.phase(), Phase::Connecting);

    enter_lobby(&mut client, &mut second).await;
    assert_eq!(connector.connects(), 2);

    client.close().await;
}

#[tokio::test]
async fn intent_racing_a_transient_close_is_not_replayed() {
    let connector = MockConnector::new();
    let mut first = connector.expect_connection();
    let mut second = connector.expect_connection();
    let mut client = RoomClient::open(connector.clone(), &config(), session(), "room-1");

    enter_lobby(&mut client, &mut first).await;
    first.close_with(1008);
    // Still authenticated locally, so the intent is queued for the old session.
    let _ = client.ready();

    enter_lobby(&mut client, &mut second).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        second.nothing_sent(),
        "the new connection must only carry its own handshake"
    );

    client.close().await;
}

#[tokio::test]
async fn reconnection_stops_after_max_attempts() {
    let connector = MockConnector::new();
    // The first connection plus ten reconnections, every one closed with 1008.
    let servers: Vec<ServerHandle> = (0..11).map(|_| connector.expect_connection()).collect();
    for server in &servers {
        server.close_with(1008);
    }
    // Never used: the client must give up before asking for it.
    let _spare = connector.expect_connection();

    let mut client = RoomClient::open(connector.clone(), &config(), session(), "room-1");

    let mut reconnects = Vec::new();
    let mut last = None;
    while let Some(event) = client.next_event().await {
        if let ConnectionEvent::Reconnecting { attempt, .. } = event {
            reconnects.push(attempt);
        }
        last = Some(event);
    }

    assert_eq!(reconnects, (1..=10).collect::<Vec<u32>>());
    assert_eq!(
        last,
        Some(ConnectionEvent::Failed(ErrorCategory::CouldNotConnect))
    );
    assert_eq!(client.phase(), Phase::Error(ErrorCategory::CouldNotConnect));
    assert_eq!(client.phase().error().unwrap().label(), "could not connect");
    assert_eq!(connector.connects(), 11);
}

#[tokio::test]
async fn successful_handshake_resets_attempts() {
    let connector = MockConnector::new();
    let config = config().with_max_reconnect_attempts(1);
    let mut servers: Vec<ServerHandle> = (0..3).map(|_| connector.expect_connection()).collect();
    let mut client = RoomClient::open(connector.clone(), &config, session(), "room-1");

    // Two transient drops, each after a completed handshake: both retried.
    for server in servers.iter_mut().take(2) {
        enter_lobby(&mut client, server).await;
        server.close_with(1008);
        wait_for(&mut client, |e| {
            matches!(e, ConnectionEvent::Reconnecting { attempt: 1, .. })
        })
        .await;
    }
    enter_lobby(&mut client, &mut servers[2]).await;
    assert_eq!(connector.connects(), 3);

    client.close().await;
}

#[tokio::test]
async fn reconnect_delay_is_honoured() {
    let connector = MockConnector::new();
    let first = connector.expect_connection();
    let _second = connector.expect_connection();
    let config = config().with_reconnect_delay(Duration::from_millis(100));
    let mut client = RoomClient::open(connector.clone(), &config, session(), "room-1");

    first.close_with(1008);
    wait_for(&mut client, |e| {
        matches!(e, ConnectionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(connector.connects(), 1);

    wait_for(&mut client, |e| {
        matches!(e, ConnectionEvent::Opened { attempt: 1 })
    })
    .await;
    assert_eq!(connector.connects(), 2);

    client.close().await;
}

// ════════════════════════════════════════════════════════════════════
// Lobby
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn taken_color_is_rejected_before_the_network() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    server.push(players_json(vec![player_json(2, 0, "not-ready")]));
    wait_for(&mut client, |_| true).await;
    assert_eq!(client.roster().taken_colors(), &[0]);

    assert!(matches!(
        client.select_color(0),
        Err(KingdomsError::ColorTaken(0))
    ));
    assert!(server.nothing_sent());

    client.select_color(1).unwrap();
    assert_eq!(server.next_json().await, json!({"at": "color", "color": 1}));

    client.close().await;
}

#[tokio::test]
async fn ready_wire_shape_is_independent_of_announcement() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    client.ready().unwrap();
    assert_eq!(server.next_json().await, json!({"at": "ready"}));
    assert!(server.nothing_sent());

    client.announce_ready().unwrap();
    let chat = server.next_json().await;
    assert_eq!(chat["at"], "chat");
    assert_eq!(chat["message"], "I am ready");
    assert_eq!(chat["user_id"], ME);

    client.close().await;
}

#[tokio::test]
async fn roster_replaced_wholesale() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    server.push(players_json(vec![
        player_json(1, 0, "ready"),
        player_json(2, 3, "not_ready"),
    ]));
    server.push(players_json(vec![player_json(2, 3, "ready")]));
    wait_for(&mut client, |_| true).await;
    wait_for(&mut client, |_| true).await;

    let roster = client.roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster.taken_colors(), &[3]);
    assert!(roster.player(1).is_none());

    client.close().await;
}

// ════════════════════════════════════════════════════════════════════
// Game
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn planned_path_is_sent_and_reconciled() {
    let (mut client, mut server, _connector) = open_client();
    enter_game(&mut client, &mut server).await;

    client.handle_input(InputEvent::Arrow(Direction::Up)).unwrap();
    client.handle_input(InputEvent::Arrow(Direction::Right)).unwrap();
    assert_eq!(
        server.next_json().await,
        json!({"at": "move", "previous": {"row": 1, "col": 1}, "current": {"row": 0, "col": 1}})
    );
    assert_eq!(
        server.next_json().await,
        json!({"at": "move", "previous": {"row": 0, "col": 1}, "current": {"row": 0, "col": 2}})
    );
    assert_eq!(client.queue().step_count(), 2);
    assert_eq!(client.cursor(), Some(Cursor::new(0, 2)));

    // The server executes the first step.
    server.push(update_json(2, 1, Some((0, 1)), Some((1, 1))));
    wait_for(&mut client, |_| true).await;
    assert_eq!(client.queue().queued_at(KING), 0);
    assert_eq!(client.queue().queued_at(Cursor::new(0, 1)), 1);
    // The local cursor stays where the player left it.
    assert_eq!(client.cursor(), Some(Cursor::new(0, 2)));

    // The path ended: no server cursor clears whatever is left.
    server.push(update_json(3, 1, None, Some((0, 1))));
    wait_for(&mut client, |_| true).await;
    assert!(client.queue().is_empty());
    assert_eq!(client.board().unwrap().turn, 3);

    client.close().await;
}

#[tokio::test]
async fn cancel_sends_exactly_one_reset() {
    let (mut client, mut server, _connector) = open_client();
    enter_game(&mut client, &mut server).await;

    client.handle_input(InputEvent::Cancel).unwrap();
    assert_eq!(server.next_json().await, json!({"at": "move"}));
    assert!(server.nothing_sent());
    assert!(client.queue().is_empty());

    client.close().await;
}

#[tokio::test]
async fn click_on_own_king_sends_cursor() {
    let (mut client, mut server, _connector) = open_client();
    enter_game(&mut client, &mut server).await;

    client.handle_input(InputEvent::Click(Cursor::new(0, 2))).unwrap();
    assert!(server.nothing_sent());
    assert_eq!(client.cursor(), Some(Cursor::new(0, 2)));

    client.handle_input(InputEvent::Click(KING)).unwrap();
    assert_eq!(
        server.next_json().await,
        json!({"at": "cursor", "cursor": {"row": 1, "col": 1}})
    );

    assert!(matches!(
        client.handle_input(InputEvent::Click(Cursor::new(7, 7))),
        Err(KingdomsError::CursorOutOfBounds { row: 7, col: 7 })
    ));

    client.close().await;
}

#[tokio::test]
async fn weak_king_moves_cursor_without_plan() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;
    server.push(json!({"at": "start"}));
    server.push(update_json(1, 1, Some((1, 1)), None));
    wait_for(&mut client, |_| true).await;
    wait_for(&mut client, |_| true).await;

    client.handle_input(InputEvent::Arrow(Direction::Down)).unwrap();
    assert_eq!(client.cursor(), Some(Cursor::new(2, 1)));
    assert!(client.queue().is_empty());
    assert!(server.nothing_sent());

    client.close().await;
}

#[tokio::test]
async fn update_before_start_is_ignored() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    server.push(update_json(1, 5, Some((1, 1)), None));
    wait_for(&mut client, |_| true).await;
    assert!(client.board().is_none());
    assert_eq!(client.phase(), Phase::Config);

    client.close().await;
}

// ════════════════════════════════════════════════════════════════════
// Chat
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_round_trip_through_server() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    assert!(matches!(
        client.send_chat("   "),
        Err(KingdomsError::EmptyChatMessage)
    ));
    assert!(server.nothing_sent());

    let sent = client.send_chat("  good luck  ").unwrap();
    let frame = server.next_json().await;
    assert_eq!(frame["message"], "good luck");
    assert_eq!(frame["timestamp"], sent.timestamp.as_str());
    // Nothing is logged until the server broadcasts it back.
    assert!(client.chat_lines().is_empty());

    server.push(frame);
    server.push(chat_json(2, "<b>gl</b> hf"));
    wait_for(&mut client, |_| true).await;
    wait_for(&mut client, |_| true).await;

    let lines = client.chat_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text, "good luck");
    assert_eq!(lines[0].user_id, ME);
    assert_eq!(lines[1].text, "<b>gl</b> hf");
    assert_eq!(lines[1].sequence_id, 1);

    client.close().await;
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn close_tears_down_transport_and_keeps_state() {
    let (mut client, mut server, _connector) = open_client();
    enter_lobby(&mut client, &mut server).await;

    client.close().await;
    assert!(server.is_closed());
    assert!(!client.is_authenticated());
    assert_eq!(client.phase(), Phase::Config);
    assert!(matches!(client.ready(), Err(KingdomsError::NotConnected)));
}

#[tokio::test]
async fn watch_subscribers_follow_phases() {
    let (mut client, mut server, _connector) = open_client();
    let mut phase = client.subscribe_phase();
    assert_eq!(*phase.borrow_and_update(), Phase::Connecting);

    enter_lobby(&mut client, &mut server).await;
    assert!(phase.has_changed().unwrap());
    assert_eq!(*phase.borrow_and_update(), Phase::Config);

    client.close().await;
}
