//! Live connection to player mapping
//!
//! Connections are ephemeral: one per transport socket, gone on disconnect.
//! The index answers "which player just dropped" on disconnect and "where do I
//! reach this player" for direct messages.

use log::debug;
use shared::PlayerId;
use std::collections::HashMap;

/// Identifier assigned by the transport to each accepted socket
pub type ConnectionId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub game_code: String,
    pub player_id: PlayerId,
}

#[derive(Debug, Default)]
pub struct ConnectionIndex {
    by_connection: HashMap<ConnectionId, PlayerInfo>,
    by_player: HashMap<PlayerId, ConnectionId>,
}

impl ConnectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `connection_id` to the player. A newer registration for the same
    /// player supersedes the older one without revoking it, so a rejoin from a
    /// fresh socket always wins over a socket that has not closed yet.
    ///
    /// If the connection was serving a different player, that player loses it
    /// and is returned so the caller can treat them as disconnected.
    pub fn register_connection(
        &mut self,
        connection_id: ConnectionId,
        game_code: &str,
        player_id: &str,
    ) -> Option<PlayerInfo> {
        if let Some(previous) = self.by_player.insert(player_id.to_string(), connection_id) {
            if previous != connection_id {
                debug!(
                    "Connection {} supersedes {} for player {}",
                    connection_id, previous, player_id
                );
            }
        }

        let displaced = self.by_connection.insert(
            connection_id,
            PlayerInfo {
                game_code: game_code.to_string(),
                player_id: player_id.to_string(),
            },
        )?;
        if displaced.player_id == player_id {
            return None;
        }
        if self.by_player.get(&displaced.player_id) != Some(&connection_id) {
            return None;
        }
        self.by_player.remove(&displaced.player_id);
        debug!(
            "Connection {} moved from player {} to {}",
            connection_id, displaced.player_id, player_id
        );
        Some(displaced)
    }

    /// Removes the connection and returns what it was mapped to. The player's
    /// reverse entry is only cleared when it still points at this connection.
    pub fn unregister_connection(&mut self, connection_id: ConnectionId) -> Option<PlayerInfo> {
        let info = self.by_connection.remove(&connection_id)?;
        if self.by_player.get(&info.player_id) == Some(&connection_id) {
            self.by_player.remove(&info.player_id);
        }
        Some(info)
    }

    pub fn get_player_info(&self, connection_id: ConnectionId) -> Option<&PlayerInfo> {
        self.by_connection.get(&connection_id)
    }

    pub fn get_connection_id(&self, player_id: &str) -> Option<ConnectionId> {
        self.by_player.get(player_id).copied()
    }

    /// True if `connection_id` is the one currently serving its player.
    pub fn is_current(&self, connection_id: ConnectionId) -> bool {
        self.by_connection
            .get(&connection_id)
            .map(|info| self.by_player.get(&info.player_id) == Some(&connection_id))
            .unwrap_or(false)
    }

    /// Forgets the player entirely, along with every connection mapped to them.
    pub fn remove_player(&mut self, player_id: &str) -> Vec<ConnectionId> {
        self.by_player.remove(player_id);
        let stale: Vec<ConnectionId> = self
            .by_connection
            .iter()
            .filter(|(_, info)| info.player_id == player_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.by_connection.remove(id);
        }
        stale
    }

    /// Drops every mapping that belongs to `game_code`.
    pub fn remove_game(&mut self, game_code: &str) {
        self.by_connection
            .retain(|_, info| info.game_code != game_code);
        let live: Vec<ConnectionId> = self.by_connection.keys().copied().collect();
        self.by_player.retain(|_, conn| live.contains(conn));
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}
