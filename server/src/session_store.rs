//! Long-lived client sessions
//!
//! A session ties a client identity (generated once per browser tab and kept in
//! its storage) to the game it belongs to. Sessions outlive individual
//! connections, which is what lets a page reload find its seat again.

use log::{debug, info};
use shared::{ClientId, PlayerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Fields supplied by the caller when saving a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub game_code: String,
    pub player_id: Option<PlayerId>,
    pub is_admin: bool,
}

impl SessionData {
    pub fn player(game_code: impl Into<String>, player_id: impl Into<PlayerId>) -> Self {
        Self {
            game_code: game_code.into(),
            player_id: Some(player_id.into()),
            is_admin: false,
        }
    }

    pub fn admin(game_code: impl Into<String>) -> Self {
        Self {
            game_code: game_code.into(),
            player_id: None,
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: ClientId,
    pub data: SessionData,
    /// Refreshed on every save and on every event carrying the client id
    pub last_active: Instant,
}

impl Session {
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        self.last_active.elapsed() > max_idle
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ClientId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the session for `client_id`, stamping it as active now.
    pub fn save_session(&mut self, client_id: &str, data: SessionData) {
        debug!(
            "Saving session for client {} (game {}, admin: {})",
            client_id, data.game_code, data.is_admin
        );
        self.sessions.insert(
            client_id.to_string(),
            Session {
                client_id: client_id.to_string(),
                data,
                last_active: Instant::now(),
            },
        );
    }

    pub fn get_session(&self, client_id: &str) -> Option<&Session> {
        self.sessions.get(client_id)
    }

    /// Marks the session as active now. False if the client has none.
    pub fn touch(&mut self, client_id: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(session) => {
                session.last_active = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn remove_session(&mut self, client_id: &str) -> Option<Session> {
        self.sessions.remove(client_id)
    }

    /// Clients whose session points at `game_code`.
    pub fn clients_in_game(&self, game_code: &str) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|s| s.data.game_code == game_code)
            .map(|s| s.client_id.clone())
            .collect()
    }

    /// Drops every session bound to the given player of a game.
    pub fn remove_player_sessions(&mut self, game_code: &str, player_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| {
            !(s.data.game_code == game_code && s.data.player_id.as_deref() == Some(player_id))
        });
        before - self.sessions.len()
    }

    /// Evicts sessions idle for longer than `max_idle` unless `in_use` says
    /// their holder is still around. Returns how many went.
    pub fn evict_idle<F>(&mut self, max_idle: Duration, in_use: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !s.is_idle(max_idle) || in_use(s));

        let evicted = before - self.sessions.len();
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
