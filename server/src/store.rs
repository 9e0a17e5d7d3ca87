//! Durable mirror of game state
//!
//! The registry treats the store as a best-effort write-through mirror: it is
//! consulted only when a game is missing from the in-memory cache, and every
//! mutation is written here before the cache is touched. Rows are kept per
//! table (games, rooms, players) and `load_game` aggregates them into a single
//! `Game` the way a joined query would.

use crate::error::StoreError;
use async_trait::async_trait;
use shared::{Game, Phase, Player};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait GameStore: Send + Sync {
    /// Inserts the game row and its room rows, replacing any retained rows for the code.
    async fn insert_game(&self, game: &Game) -> Result<(), StoreError>;

    /// Denormalized read: the game with its rooms and players, or `None`.
    async fn load_game(&self, code: &str) -> Result<Option<Game>, StoreError>;

    async fn update_phase(&self, code: &str, phase: Phase) -> Result<(), StoreError>;

    async fn insert_player(&self, code: &str, player: &Player) -> Result<(), StoreError>;

    /// Overwrites an existing player row (role, liveness, tasks).
    async fn update_player(&self, code: &str, player: &Player) -> Result<(), StoreError>;

    async fn delete_player(&self, code: &str, player_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct GameRow {
    max_players: usize,
    phase: Phase,
}

#[derive(Debug, Default)]
struct Tables {
    games: HashMap<String, GameRow>,
    rooms: HashMap<String, Vec<String>>,
    players: HashMap<String, Vec<Player>>,
}

/// Process-local store used when no external database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn insert_game(&self, game: &Game) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.games.insert(
            game.code.clone(),
            GameRow {
                max_players: game.max_players,
                phase: game.phase,
            },
        );
        tables.rooms.insert(game.code.clone(), game.rooms.clone());
        tables
            .players
            .insert(game.code.clone(), game.players.clone());
        Ok(())
    }

    async fn load_game(&self, code: &str) -> Result<Option<Game>, StoreError> {
        let tables = self.tables()?;
        let Some(row) = tables.games.get(code) else {
            return Ok(None);
        };

        Ok(Some(Game {
            code: code.to_string(),
            max_players: row.max_players,
            phase: row.phase,
            rooms: tables.rooms.get(code).cloned().unwrap_or_default(),
            players: tables.players.get(code).cloned().unwrap_or_default(),
        }))
    }

    async fn update_phase(&self, code: &str, phase: Phase) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        match tables.games.get_mut(code) {
            Some(row) => {
                row.phase = phase;
                Ok(())
            }
            None => Err(StoreError::WriteRejected(format!("no game row for {}", code))),
        }
    }

    async fn insert_player(&self, code: &str, player: &Player) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if !tables.games.contains_key(code) {
            return Err(StoreError::WriteRejected(format!("no game row for {}", code)));
        }
        tables
            .players
            .entry(code.to_string())
            .or_default()
            .push(player.clone());
        Ok(())
    }

    async fn update_player(&self, code: &str, player: &Player) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let row = tables
            .players
            .get_mut(code)
            .and_then(|players| players.iter_mut().find(|p| p.id == player.id));

        match row {
            Some(row) => {
                *row = player.clone();
                Ok(())
            }
            None => Err(StoreError::WriteRejected(format!(
                "no player row {} in {}",
                player.id, code
            ))),
        }
    }

    async fn delete_player(&self, code: &str, player_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if let Some(players) = tables.players.get_mut(code) {
            players.retain(|p| p.id != player_id);
        }
        Ok(())
    }
}

/// Delegates to a `MemoryStore` but fails every write while failing is set.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing: std::sync::atomic::AtomicBool,
    failing_phase: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyStore {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Fails only phase writes.
    pub(crate) fn set_failing_phase(&self, failing: bool) {
        self.failing_phase
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl GameStore for FlakyStore {
    async fn insert_game(&self, game: &Game) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_game(game).await
    }
    async fn load_game(&self, code: &str) -> Result<Option<Game>, StoreError> {
        self.inner.load_game(code).await
    }
    async fn update_phase(&self, code: &str, phase: Phase) -> Result<(), StoreError> {
        self.check()?;
        if self.failing_phase.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated phase outage".to_string()));
        }
        self.inner.update_phase(code, phase).await
    }
    async fn insert_player(&self, code: &str, player: &Player) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_player(code, player).await
    }
    async fn update_player(&self, code: &str, player: &Player) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_player(code, player).await
    }
    async fn delete_player(&self, code: &str, player_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_player(code, player_id).await
    }
}
