//! Client network layer speaking the JSON event protocol over WebSocket

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientEvent, ClientId, Player, ServerEvent};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::identity::ClientIdentity;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `restore_session` waits for the server to confirm a rejoin.
pub const RESTORE_WAIT: Duration = Duration::from_secs(2);

/// Outcome of trying to get back into a remembered game
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Nothing was remembered
    NoSession,
    /// The game is gone and the remembered session was forgotten
    GameGone,
    /// Admin session re-registered
    Admin,
    /// Player session re-registered and the rejoin answered with the game state
    Rejoined(ServerEvent),
    /// Player session re-registered but no rejoin confirmation arrived
    Registered,
}

pub struct GameClient {
    socket: Socket,
    client_id: ClientId,
}

impl GameClient {
    pub async fn connect(url: &str, client_id: ClientId) -> Result<Self, Box<dyn std::error::Error>> {
        let (socket, _response) = tokio_tungstenite::connect_async(url).await?;
        info!("Connected to {}", url);
        Ok(Self { socket, client_id })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), Box<dyn std::error::Error>> {
        let text = serde_json::to_string(event)?;
        debug!("-> {}", event.name());
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Waits for the next server event. Returns `None` once the socket closes.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>, Box<dyn std::error::Error>> {
        while let Some(frame) = self.socket.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!("Ignoring unreadable event: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Like `next_event`, but gives up after `wait`.
    pub async fn next_event_within(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ServerEvent>, Box<dyn std::error::Error>> {
        match tokio::time::timeout(wait, self.next_event()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    pub async fn verify_game(&mut self, code: &str) -> Result<bool, Box<dyn std::error::Error>> {
        self.send(&ClientEvent::VerifyGame {
            code: code.to_string(),
        })
        .await?;

        loop {
            match self.next_event().await? {
                Some(ServerEvent::GameVerified { exists, .. }) => return Ok(exists),
                Some(other) => debug!("Skipping {:?} while verifying", other),
                None => return Err("connection closed".into()),
            }
        }
    }

    pub async fn create_game(
        &mut self,
        code: &str,
        max_players: usize,
        rooms: Vec<String>,
    ) -> Result<ServerEvent, Box<dyn std::error::Error>> {
        self.send(&ClientEvent::CreateGame {
            code: code.to_string(),
            max_players,
            rooms,
            client_id: self.client_id.clone(),
        })
        .await?;
        self.expect_reply(|event| matches!(event, ServerEvent::GameCreated { .. }))
            .await
    }

    pub async fn join_game(
        &mut self,
        game_code: &str,
        player: Player,
    ) -> Result<ServerEvent, Box<dyn std::error::Error>> {
        self.send(&ClientEvent::JoinGame {
            game_code: game_code.to_string(),
            player,
            client_id: self.client_id.clone(),
        })
        .await?;
        self.expect_reply(|event| matches!(event, ServerEvent::JoinGameSuccess { .. }))
            .await
    }

    pub async fn end_game(&mut self, code: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&ClientEvent::EndGame {
            code: code.to_string(),
        })
        .await
    }

    /// Re-establishes the remembered session: checks the game still exists,
    /// re-registers the session on this connection and, for players, asks to
    /// rejoin within the grace period.
    pub async fn restore_session(
        &mut self,
        identity: &mut ClientIdentity,
    ) -> Result<RestoreOutcome, Box<dyn std::error::Error>> {
        let Some(session) = identity.session.clone() else {
            return Ok(RestoreOutcome::NoSession);
        };

        if !self.verify_game(&session.game_code).await? {
            info!("Game {} no longer exists", session.game_code);
            identity.forget_session();
            return Ok(RestoreOutcome::GameGone);
        }

        self.send(&ClientEvent::RegisterSession {
            game_code: session.game_code.clone(),
            player_id: session.player_id.clone(),
            client_id: self.client_id.clone(),
            is_admin: session.is_admin,
        })
        .await?;

        let Some(player_id) = session.player_id else {
            return Ok(RestoreOutcome::Admin);
        };

        self.send(&ClientEvent::RejoinGame {
            game_code: session.game_code.clone(),
            player_id,
            client_id: self.client_id.clone(),
        })
        .await?;

        loop {
            match self.next_event_within(RESTORE_WAIT).await? {
                Some(state @ ServerEvent::GameState { .. }) => {
                    return Ok(RestoreOutcome::Rejoined(state))
                }
                Some(ServerEvent::GameError { kind, message }) => {
                    warn!("Restore failed: {} ({})", message, kind);
                    if kind == "SessionInvalid" {
                        identity.forget_session();
                    }
                    return Ok(RestoreOutcome::Registered);
                }
                Some(other) => debug!("Skipping {:?} while restoring", other),
                None => return Ok(RestoreOutcome::Registered),
            }
        }
    }

    /// Reads events until one satisfies `accept`, turning a `game-error`
    /// reply into an error.
    async fn expect_reply<F>(&mut self, accept: F) -> Result<ServerEvent, Box<dyn std::error::Error>>
    where
        F: Fn(&ServerEvent) -> bool,
    {
        loop {
            match self.next_event().await? {
                Some(event) if accept(&event) => return Ok(event),
                Some(ServerEvent::GameError { kind, message }) => {
                    return Err(format!("{}: {}", kind, message).into())
                }
                Some(other) => debug!("Skipping {:?}", other),
                None => return Err("connection closed".into()),
            }
        }
    }

    pub async fn close(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.socket.close(None).await?;
        Ok(())
    }
}
