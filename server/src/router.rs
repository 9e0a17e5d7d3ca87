//! Inbound event dispatch
//!
//! The router owns every registry and is driven by a single coordinator task.
//! Each handler validates against the registries, performs at most one registry
//! mutation, and returns the events to deliver. Broadcasts are computed after
//! the mutation has landed in the cache, so every recipient sees the new state.
//! Errors never escape a handler: they become a `game-error` for the sender.

use crate::connection_index::{ConnectionId, ConnectionIndex};
use crate::error::GameError;
use crate::game_registry::GameRegistry;
use crate::reconnection::{ReconnectTimeout, ReconnectionSupervisor};
use crate::roles;
use crate::session_store::{SessionData, SessionStore};
use crate::store::GameStore;
use log::{debug, error, info, warn};
use shared::{
    normalize_code, ClientEvent, Game, Phase, Player, ServerEvent, MIN_PLAYERS,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One outbound event addressed to one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub to: ConnectionId,
    pub event: ServerEvent,
}

/// Connections subscribed to each game's broadcasts
#[derive(Debug, Default)]
struct Channels {
    members: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Channels {
    /// Subscribes the connection to `game_code`, dropping any other subscription.
    fn join(&mut self, game_code: &str, connection_id: ConnectionId) {
        self.leave_all(connection_id);
        self.members
            .entry(game_code.to_string())
            .or_default()
            .insert(connection_id);
    }

    fn leave(&mut self, game_code: &str, connection_id: ConnectionId) {
        if let Some(members) = self.members.get_mut(game_code) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.members.remove(game_code);
            }
        }
    }

    fn leave_all(&mut self, connection_id: ConnectionId) {
        self.members.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    fn members(&self, game_code: &str) -> Vec<ConnectionId> {
        self.members
            .get(game_code)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    fn close(&mut self, game_code: &str) -> Vec<ConnectionId> {
        self.members
            .remove(game_code)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default()
    }
}

fn roster(players: &[Player]) -> Vec<Player> {
    players.iter().map(Player::public).collect()
}

pub struct EventRouter {
    games: GameRegistry,
    sessions: SessionStore,
    connections: ConnectionIndex,
    reconnects: ReconnectionSupervisor,
    channels: Channels,
}

impl EventRouter {
    /// Builds the router and hands back the stream of grace-period expiries the
    /// owner must feed into `handle_timeout`.
    pub fn new(
        store: Arc<dyn GameStore>,
        grace_period: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ReconnectTimeout>) {
        let (reconnects, timeouts) = ReconnectionSupervisor::new(grace_period);
        let router = Self {
            games: GameRegistry::new(store),
            sessions: SessionStore::new(),
            connections: ConnectionIndex::new(),
            reconnects,
            channels: Channels::default(),
        };
        (router, timeouts)
    }

    pub fn games(&mut self) -> &mut GameRegistry {
        &mut self.games
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn connections(&self) -> &ConnectionIndex {
        &self.connections
    }

    pub fn reconnects(&self) -> &ReconnectionSupervisor {
        &self.reconnects
    }

    pub fn channel_members(&self, game_code: &str) -> Vec<ConnectionId> {
        self.channels.members(&normalize_code(game_code))
    }

    pub async fn handle_event(
        &mut self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Vec<Dispatch> {
        let name = event.name();
        debug!("Connection {} sent {}", connection_id, name);
        if let Some(client_id) = event.client_id() {
            self.sessions.touch(client_id);
        }

        match self.route(connection_id, event).await {
            Ok(dispatches) => dispatches,
            Err(err) => {
                match &err {
                    GameError::Store(cause) => {
                        error!("{} from connection {} failed: {}", name, connection_id, cause)
                    }
                    other => warn!("{} from connection {} rejected: {}", name, connection_id, other),
                }
                vec![Dispatch {
                    to: connection_id,
                    event: ServerEvent::error(err.kind(), err.client_message()),
                }]
            }
        }
    }

    async fn route(
        &mut self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<Vec<Dispatch>, GameError> {
        match event {
            ClientEvent::VerifyGame { code } => self.verify_game(connection_id, &code).await,
            ClientEvent::CreateGame {
                code,
                max_players,
                rooms,
                client_id,
            } => {
                self.create_game(connection_id, &code, max_players, rooms, &client_id)
                    .await
            }
            ClientEvent::EndGame { code } => self.end_game(&code).await,
            ClientEvent::JoinGame {
                game_code,
                player,
                client_id,
            } => {
                self.join_game(connection_id, &game_code, player, &client_id)
                    .await
            }
            ClientEvent::RemovePlayer {
                game_code,
                player_id,
                client_id,
                is_admin,
            } => {
                debug!(
                    "Client {} asks to remove {} (admin: {})",
                    client_id, player_id, is_admin
                );
                self.remove_player(connection_id, &game_code, &player_id)
                    .await
            }
            ClientEvent::RejoinGame {
                game_code,
                player_id,
                client_id,
            } => {
                self.rejoin_game(connection_id, &game_code, &player_id, &client_id)
                    .await
            }
            ClientEvent::RegisterSession {
                game_code,
                player_id,
                client_id,
                is_admin,
            } => {
                self.register_session(
                    connection_id,
                    &game_code,
                    player_id.as_deref(),
                    &client_id,
                    is_admin,
                )
                .await
            }
            ClientEvent::StartGame { code } => self.start_game(&code).await,
            ClientEvent::UpdatePhase { code, phase } => self.update_phase(&code, phase).await,
            ClientEvent::CompleteTask {
                game_code,
                player_id,
                task_id,
            } => self.complete_task(&game_code, &player_id, &task_id).await,
        }
    }

    fn broadcast(
        &self,
        game_code: &str,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> Vec<Dispatch> {
        self.channels
            .members(game_code)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .map(|to| Dispatch {
                to,
                event: event.clone(),
            })
            .collect()
    }

    /// Points the connection at a player. A player the socket was serving
    /// until now has lost it and enters the grace period.
    fn bind_connection(&mut self, connection_id: ConnectionId, code: &str, player_id: &str) {
        if let Some(displaced) = self
            .connections
            .register_connection(connection_id, code, player_id)
        {
            info!(
                "Connection {} left player {} for {}",
                connection_id, displaced.player_id, player_id
            );
            self.reconnects.player_disconnected(
                &displaced.game_code,
                &displaced.player_id,
                connection_id,
            );
        }
    }

    /// True if `client_id` holds the player session for this seat.
    fn owns_seat(&self, client_id: &str, code: &str, player_id: &str) -> bool {
        self.sessions
            .get_session(client_id)
            .map(|session| {
                !session.data.is_admin
                    && session.data.game_code == code
                    && session.data.player_id.as_deref() == Some(player_id)
            })
            .unwrap_or(false)
    }

    async fn require_game(&mut self, code: &str) -> Result<Game, GameError> {
        self.games
            .get_game(code)
            .await?
            .ok_or_else(|| GameError::GameNotFound(code.to_string()))
    }

    async fn verify_game(
        &mut self,
        connection_id: ConnectionId,
        code: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(code);
        let exists = match self.games.verify_game(&code).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!("Could not verify game {}: {}", code, err);
                false
            }
        };

        Ok(vec![Dispatch {
            to: connection_id,
            event: ServerEvent::GameVerified { code, exists },
        }])
    }

    async fn create_game(
        &mut self,
        connection_id: ConnectionId,
        code: &str,
        max_players: usize,
        rooms: Vec<String>,
        client_id: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let game = self.games.create_game(code, max_players, rooms).await?;

        self.sessions
            .save_session(client_id, SessionData::admin(game.code.clone()));
        self.channels.join(&game.code, connection_id);

        Ok(vec![Dispatch {
            to: connection_id,
            event: ServerEvent::GameCreated {
                code: game.code,
                max_players: game.max_players,
                rooms: game.rooms,
                players: Vec::new(),
            },
        }])
    }

    async fn end_game(&mut self, code: &str) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(code);
        let Some(bound) = self.games.end_game(&code, &self.sessions).await? else {
            debug!("end-game for unknown game {} ignored", code);
            return Ok(Vec::new());
        };

        for client_id in &bound {
            self.sessions.remove_session(client_id);
        }
        self.connections.remove_game(&code);

        // Grace timers still running for this game are left to fire into a no-op.
        let event = ServerEvent::GameEnded { code: code.clone() };
        Ok(self
            .channels
            .close(&code)
            .into_iter()
            .map(|to| Dispatch {
                to,
                event: event.clone(),
            })
            .collect())
    }

    async fn join_game(
        &mut self,
        connection_id: ConnectionId,
        game_code: &str,
        player: Player,
        client_id: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(game_code);
        let player_id = player.id.clone();
        let players = self.games.add_player(&code, player).await?;
        let joined = players
            .iter()
            .find(|p| p.id == player_id)
            .cloned()
            .ok_or_else(|| GameError::PlayerNotFound(player_id.clone()))?;

        self.sessions
            .save_session(client_id, SessionData::player(code.clone(), player_id.clone()));
        self.bind_connection(connection_id, &code, &player_id);
        self.channels.join(&code, connection_id);

        let mut dispatches = vec![Dispatch {
            to: connection_id,
            event: ServerEvent::JoinGameSuccess {
                game_code: code.clone(),
                player: joined,
                players: roster(&players),
            },
        }];
        dispatches.extend(self.broadcast(
            &code,
            ServerEvent::PlayersUpdated {
                players: roster(&players),
            },
            None,
        ));
        Ok(dispatches)
    }

    /// Drops every trace of a departed player and produces the departure
    /// broadcasts. `exclude` keeps the requester out of `player-removed`.
    fn player_departed(
        &mut self,
        code: &str,
        player_id: &str,
        players: &[Player],
        exclude: Option<ConnectionId>,
    ) -> Vec<Dispatch> {
        self.reconnects.cancel(player_id);
        self.sessions.remove_player_sessions(code, player_id);

        let mut dispatches = self.broadcast(
            code,
            ServerEvent::PlayerRemoved {
                player_id: player_id.to_string(),
            },
            exclude,
        );

        for stale in self.connections.remove_player(player_id) {
            self.channels.leave(code, stale);
        }

        dispatches.extend(self.broadcast(
            code,
            ServerEvent::PlayersUpdated {
                players: roster(players),
            },
            None,
        ));
        dispatches
    }

    async fn remove_player(
        &mut self,
        connection_id: ConnectionId,
        game_code: &str,
        player_id: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(game_code);
        let present = self.require_game(&code).await?.player(player_id).is_some();
        let players = self.games.remove_player(&code, player_id).await?;

        if !present {
            return Ok(vec![Dispatch {
                to: connection_id,
                event: ServerEvent::PlayersUpdated {
                    players: roster(&players),
                },
            }]);
        }

        Ok(self.player_departed(&code, player_id, &players, Some(connection_id)))
    }

    async fn rejoin_game(
        &mut self,
        connection_id: ConnectionId,
        game_code: &str,
        player_id: &str,
        client_id: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(game_code);
        let pending_here = self
            .reconnects
            .pending_record(player_id)
            .map(|record| record.game_code == code)
            .unwrap_or(false);
        if !pending_here {
            debug!(
                "Ignoring rejoin of {} to {}: no pending reconnection",
                player_id, code
            );
            return Ok(Vec::new());
        }

        if !self.owns_seat(client_id, &code, player_id) {
            warn!(
                "Ignoring rejoin of {} from client {} without a matching session",
                player_id, client_id
            );
            return Ok(Vec::new());
        }

        let Some(game) = self.games.get_game(&code).await? else {
            debug!("Ignoring rejoin of {}: game {} is gone", player_id, code);
            return Ok(Vec::new());
        };
        let Some(own) = game.player(player_id).cloned() else {
            debug!("Ignoring rejoin of {}: no longer in {}", player_id, code);
            return Ok(Vec::new());
        };

        self.reconnects.player_rejoined(&code, player_id);
        self.sessions
            .save_session(client_id, SessionData::player(code.clone(), player_id));
        self.bind_connection(connection_id, &code, player_id);
        self.channels.join(&code, connection_id);

        // The rejoining player keeps sight of their own role and tasks.
        let players = game
            .players
            .iter()
            .map(|p| if p.id == own.id { own.clone() } else { p.public() })
            .collect();

        Ok(vec![Dispatch {
            to: connection_id,
            event: ServerEvent::GameState {
                game_code: code,
                players,
                phase: game.phase,
            },
        }])
    }

    async fn register_session(
        &mut self,
        connection_id: ConnectionId,
        game_code: &str,
        player_id: Option<&str>,
        client_id: &str,
        is_admin: bool,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(game_code);
        let Some(game) = self.games.get_game(&code).await? else {
            self.sessions.remove_session(client_id);
            return Err(GameError::SessionInvalid);
        };

        if is_admin {
            self.sessions
                .save_session(client_id, SessionData::admin(code.clone()));
            self.channels.join(&code, connection_id);
            info!("Admin session for {} restored on connection {}", code, connection_id);
            return Ok(Vec::new());
        }

        let Some(player_id) = player_id.filter(|id| game.player(id).is_some()) else {
            self.sessions.remove_session(client_id);
            return Err(GameError::SessionInvalid);
        };
        if !self.owns_seat(client_id, &code, player_id) {
            warn!(
                "Client {} tried to register for player {} without owning the seat",
                client_id, player_id
            );
            return Err(GameError::SessionInvalid);
        }

        self.sessions
            .save_session(client_id, SessionData::player(code.clone(), player_id));
        self.bind_connection(connection_id, &code, player_id);
        self.channels.join(&code, connection_id);
        info!(
            "Session for player {} in {} restored on connection {}",
            player_id, code, connection_id
        );
        Ok(Vec::new())
    }

    async fn start_game(&mut self, code: &str) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(code);
        let game = self.require_game(&code).await?;
        if game.phase != Phase::Lobby {
            return Err(GameError::InvalidRequest(format!(
                "Game {} has already started",
                code
            )));
        }
        if game.players.len() < MIN_PLAYERS {
            return Err(GameError::InvalidRequest(format!(
                "At least {} players are needed to start",
                MIN_PLAYERS
            )));
        }

        let assigned = roles::assign_roles(&game, &mut rand::thread_rng());
        let players = self.games.start_game(&code, assigned).await?;

        let mut dispatches: Vec<Dispatch> = players
            .iter()
            .filter_map(|player| {
                let to = self.connections.get_connection_id(&player.id)?;
                Some(Dispatch {
                    to,
                    event: ServerEvent::RoleAssigned {
                        player_id: player.id.clone(),
                        role: player.role,
                        tasks: player.tasks.clone(),
                    },
                })
            })
            .collect();
        dispatches.extend(self.broadcast(
            &code,
            ServerEvent::PhaseChanged {
                game_code: code.clone(),
                phase: Phase::Playing,
            },
            None,
        ));
        Ok(dispatches)
    }

    async fn update_phase(&mut self, code: &str, phase: Phase) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(code);
        if !matches!(phase, Phase::Playing | Phase::Meeting) {
            return Err(GameError::InvalidRequest(format!(
                "Cannot switch to {} with update-phase",
                phase
            )));
        }

        let game = self.require_game(&code).await?;
        if game.phase == Phase::Lobby {
            return Err(GameError::InvalidRequest(format!(
                "Game {} has not started yet",
                code
            )));
        }

        self.games.update_game_phase(&code, phase).await?;
        Ok(self.broadcast(
            &code,
            ServerEvent::PhaseChanged {
                game_code: code.clone(),
                phase,
            },
            None,
        ))
    }

    async fn complete_task(
        &mut self,
        game_code: &str,
        player_id: &str,
        task_id: &str,
    ) -> Result<Vec<Dispatch>, GameError> {
        let code = normalize_code(game_code);
        let game = self.require_game(&code).await?;
        let mut player = game
            .player(player_id)
            .cloned()
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;

        let task = player
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| GameError::InvalidRequest(format!("Unknown task {}", task_id)))?;
        if task.completed {
            return Ok(Vec::new());
        }
        task.completed = true;

        self.games.update_players(&code, vec![player]).await?;
        Ok(self.broadcast(
            &code,
            ServerEvent::TaskCompleted {
                player_id: player_id.to_string(),
                task_id: task_id.to_string(),
            },
            None,
        ))
    }

    /// Transport loss. Arms the grace timer only when the closed socket was the
    /// one currently serving its player; a superseded socket closing late is
    /// just forgotten.
    pub fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        self.channels.leave_all(connection_id);

        let current = self.connections.is_current(connection_id);
        let Some(info) = self.connections.unregister_connection(connection_id) else {
            return;
        };

        if current {
            self.reconnects
                .player_disconnected(&info.game_code, &info.player_id, connection_id);
        } else {
            debug!(
                "Superseded connection {} of player {} closed",
                connection_id, info.player_id
            );
        }
    }

    /// Converts an expired grace period into a removal with the same
    /// broadcasts an explicit removal produces.
    pub async fn handle_timeout(&mut self, timeout: ReconnectTimeout) -> Vec<Dispatch> {
        let Some(record) = self.reconnects.take_expired(&timeout) else {
            return Vec::new();
        };

        if self.connections.get_connection_id(&record.player_id).is_some() {
            info!(
                "Player {} re-registered without rejoining, keeping their seat",
                record.player_id
            );
            return Vec::new();
        }

        let game = match self.games.get_game(&record.game_code).await {
            Ok(Some(game)) => game,
            Ok(None) => {
                debug!("Timeout for {}: game {} is gone", record.player_id, record.game_code);
                return Vec::new();
            }
            Err(err) => {
                error!("Timeout for {} could not load game: {}", record.player_id, err);
                self.reconnects.player_disconnected(
                    &record.game_code,
                    &record.player_id,
                    record.connection_id,
                );
                return Vec::new();
            }
        };
        if game.player(&record.player_id).is_none() {
            return Vec::new();
        }

        match self
            .games
            .remove_player(&record.game_code, &record.player_id)
            .await
        {
            Ok(players) => {
                self.player_departed(&record.game_code, &record.player_id, &players, None)
            }
            Err(err) => {
                error!(
                    "Could not remove timed out player {}, retrying after another grace period: {}",
                    record.player_id, err
                );
                self.reconnects.player_disconnected(
                    &record.game_code,
                    &record.player_id,
                    record.connection_id,
                );
                Vec::new()
            }
        }
    }

    /// Evicts idle sessions, sparing any whose holder is still connected: a
    /// player with a live socket, or an admin whose game channel is open.
    pub fn evict_idle_sessions(&mut self, max_idle: Duration) -> usize {
        let connections = &self.connections;
        let channels = &self.channels;
        self.sessions.evict_idle(max_idle, |session| match &session.data.player_id {
            Some(player_id) => connections.get_connection_id(player_id).is_some(),
            None => !channels.members(&session.data.game_code).is_empty(),
        })
    }
}
