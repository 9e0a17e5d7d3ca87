//! Integration tests for the networked coordinator
//!
//! These tests start a real server on an ephemeral port and talk to it over
//! WebSocket with the headless client.

use client::identity::{ClientIdentity, StoredSession};
use client::network::{GameClient, RestoreOutcome};
use futures::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use server::store::MemoryStore;
use shared::{Phase, Player, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(grace_period: Duration) -> (String, mpsc::UnboundedSender<ServerMessage>) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        grace_period,
        ..ServerConfig::default()
    };
    let server = Server::new(config, Arc::new(MemoryStore::new()))
        .await
        .expect("Failed to start server");
    let url = format!("ws://{}", server.local_addr());
    let control = server.control();
    tokio::spawn(server.run());
    (url, control)
}

async fn connect(url: &str, client_id: &str) -> GameClient {
    GameClient::connect(url, client_id.to_string())
        .await
        .expect("Failed to connect")
}

/// Reads events until one matches, failing the test after `WAIT`.
async fn wait_for<F>(client: &mut GameClient, accept: F) -> ServerEvent
where
    F: Fn(&ServerEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = client
                .next_event()
                .await
                .unwrap()
                .expect("connection closed");
            if accept(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn rooms() -> Vec<String> {
    vec!["Cafeteria".to_string(), "Reactor".to_string()]
}

/// PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Verifies unknown and created games over a live connection
    #[tokio::test]
    async fn verify_and_create_over_websocket() {
        let (url, control) = start_server(Duration::from_secs(30)).await;
        let mut admin = connect(&url, "admin-client").await;

        assert!(!admin.verify_game("ABC123").await.unwrap());

        let created = admin.create_game("abc123", 4, rooms()).await.unwrap();
        assert_eq!(
            created,
            ServerEvent::GameCreated {
                code: "ABC123".to_string(),
                max_players: 4,
                rooms: rooms(),
                players: Vec::new(),
            }
        );
        assert!(admin.verify_game("abc123").await.unwrap());

        let duplicate = admin.create_game("ABC123", 4, rooms()).await;
        assert!(duplicate.unwrap_err().to_string().contains("GameAlreadyExists"));

        let _ = control.send(ServerMessage::Shutdown);
    }

    /// Frames that are not valid events are answered with an error, not a disconnect
    #[tokio::test]
    async fn malformed_frames_get_error_reply() {
        let (url, control) = start_server(Duration::from_secs(30)).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        socket
            .send(Message::Text(r#"{"event":"fly-away","data":{}}"#.to_string()))
            .await
            .unwrap();

        let reply = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        let Message::Text(text) = reply else {
            panic!("expected a text frame, got {:?}", reply);
        };
        let event: ServerEvent = serde_json::from_str(&text).unwrap();
        assert!(matches!(event, ServerEvent::GameError { ref kind, .. } if kind == "InvalidRequest"));

        socket
            .send(Message::Text(
                r#"{"event":"verify-game","data":{"code":"nope"}}"#.to_string(),
            ))
            .await
            .unwrap();
        let reply = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(
            reply,
            Message::Text(r#"{"event":"game-verified","data":{"code":"NOPE","exists":false}}"#.to_string())
        );

        let _ = control.send(ServerMessage::Shutdown);
    }
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    /// Join is broadcast to the admin, and a restarted client gets its seat back
    #[tokio::test]
    async fn join_disconnect_and_restore() {
        let (url, control) = start_server(Duration::from_secs(30)).await;
        let mut admin = connect(&url, "admin-client").await;
        admin.create_game("ABC123", 4, rooms()).await.unwrap();

        let mut alice = connect(&url, "client-alice").await;
        let joined = alice
            .join_game("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();
        assert!(matches!(joined, ServerEvent::JoinGameSuccess { ref players, .. } if players.len() == 1));

        let update = wait_for(&mut admin, |e| matches!(e, ServerEvent::PlayersUpdated { .. })).await;
        assert_eq!(
            update,
            ServerEvent::PlayersUpdated {
                players: vec![Player::new("p1", "Alice")],
            }
        );

        assert_ok!(alice.close().await);
        sleep(Duration::from_millis(200)).await;

        let mut identity = ClientIdentity {
            client_id: "client-alice".to_string(),
            session: Some(StoredSession {
                game_code: "ABC123".to_string(),
                player_id: Some("p1".to_string()),
                is_admin: false,
            }),
        };
        let mut alice = connect(&url, "client-alice").await;
        let outcome = alice.restore_session(&mut identity).await.unwrap();
        assert_eq!(
            outcome,
            RestoreOutcome::Rejoined(ServerEvent::GameState {
                game_code: "ABC123".to_string(),
                players: vec![Player::new("p1", "Alice")],
                phase: Phase::Lobby,
            })
        );

        let _ = control.send(ServerMessage::Shutdown);
    }

    /// A player who stays away past the grace period is removed for everyone
    #[tokio::test]
    async fn grace_period_expiry_removes_player() {
        let (url, control) = start_server(Duration::from_millis(100)).await;
        let mut admin = connect(&url, "admin-client").await;
        admin.create_game("ABC123", 4, rooms()).await.unwrap();

        let mut bob = connect(&url, "client-bob").await;
        bob.join_game("ABC123", Player::new("p2", "Bob")).await.unwrap();
        wait_for(&mut admin, |e| matches!(e, ServerEvent::PlayersUpdated { .. })).await;

        assert_ok!(bob.close().await);

        let removed = wait_for(&mut admin, |e| matches!(e, ServerEvent::PlayerRemoved { .. })).await;
        assert_eq!(
            removed,
            ServerEvent::PlayerRemoved {
                player_id: "p2".to_string(),
            }
        );
        let update = wait_for(&mut admin, |e| matches!(e, ServerEvent::PlayersUpdated { .. })).await;
        assert_eq!(update, ServerEvent::PlayersUpdated { players: vec![] });

        let mut identity = ClientIdentity {
            client_id: "client-bob".to_string(),
            session: Some(StoredSession {
                game_code: "ABC123".to_string(),
                player_id: Some("p2".to_string()),
                is_admin: false,
            }),
        };
        let mut bob = connect(&url, "client-bob").await;
        let outcome = bob.restore_session(&mut identity).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Registered);
        assert_eq!(identity.session, None);

        let _ = control.send(ServerMessage::Shutdown);
    }

    /// Ending a game notifies its members and makes the code unknown
    #[tokio::test]
    async fn end_game_notifies_members() {
        let (url, control) = start_server(Duration::from_secs(30)).await;
        let mut admin = connect(&url, "admin-client").await;
        admin.create_game("ABC123", 4, rooms()).await.unwrap();

        let mut alice = connect(&url, "client-alice").await;
        alice
            .join_game("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();

        assert_ok!(admin.end_game("ABC123").await);
        let ended = wait_for(&mut alice, |e| matches!(e, ServerEvent::GameEnded { .. })).await;
        assert_eq!(
            ended,
            ServerEvent::GameEnded {
                code: "ABC123".to_string(),
            }
        );

        let mut identity = ClientIdentity {
            client_id: "client-alice".to_string(),
            session: Some(StoredSession {
                game_code: "ABC123".to_string(),
                player_id: Some("p1".to_string()),
                is_admin: false,
            }),
        };
        let mut returning = connect(&url, "client-alice").await;
        assert_eq!(
            returning.restore_session(&mut identity).await.unwrap(),
            RestoreOutcome::GameGone
        );
        assert_eq!(identity.session, None);

        let _ = control.send(ServerMessage::Shutdown);
    }
}
