//! Authoritative game cache with write-through to the durable store
//!
//! The in-memory map is the source of truth for admission decisions. Every
//! mutation runs its checks against the cached game, writes to the store, and
//! only then touches the cache, so a failed write leaves the cache exactly as
//! it was. All methods take `&mut self` and the registry is owned by a single
//! coordinator task, which makes check, write and cache update one step that no
//! other event can interleave with.

use crate::error::GameError;
use crate::session_store::SessionStore;
use crate::store::GameStore;
use log::{debug, info};
use shared::{normalize_code, ClientId, Game, Phase, Player, MAX_PLAYERS, MIN_PLAYERS};
use std::collections::HashMap;
use std::sync::Arc;

pub struct GameRegistry {
    store: Arc<dyn GameStore>,
    cache: HashMap<String, Game>,
}

impl GameRegistry {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Ensures the game is cached, loading it from the store on a miss.
    /// Ended games retained in the store count as absent.
    async fn load(&mut self, code: &str) -> Result<Option<&mut Game>, GameError> {
        if !self.cache.contains_key(code) {
            match self.store.load_game(code).await? {
                Some(game) if game.phase != Phase::Ended => {
                    debug!("Loaded game {} from store", code);
                    self.cache.insert(code.to_string(), game);
                }
                _ => return Ok(None),
            }
        }
        Ok(self.cache.get_mut(code))
    }

    async fn require(&mut self, code: &str) -> Result<&mut Game, GameError> {
        self.load(code)
            .await?
            .ok_or_else(|| GameError::GameNotFound(code.to_string()))
    }

    pub async fn create_game(
        &mut self,
        code: &str,
        max_players: usize,
        rooms: Vec<String>,
    ) -> Result<Game, GameError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(GameError::InvalidRequest("Game code is required".to_string()));
        }
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&max_players) {
            return Err(GameError::InvalidRequest(format!(
                "Max players must be between {} and {}",
                MIN_PLAYERS, MAX_PLAYERS
            )));
        }
        if rooms.iter().all(|room| room.trim().is_empty()) {
            return Err(GameError::InvalidRequest(
                "At least one room is required".to_string(),
            ));
        }
        if self.load(&code).await?.is_some() {
            return Err(GameError::GameAlreadyExists(code));
        }

        let mut unique_rooms: Vec<String> = Vec::new();
        for room in rooms.iter().map(|room| room.trim()) {
            if !room.is_empty() && !unique_rooms.iter().any(|r| r == room) {
                unique_rooms.push(room.to_string());
            }
        }

        let game = Game::new(&code, max_players, unique_rooms);
        self.store.insert_game(&game).await?;
        self.cache.insert(code.clone(), game.clone());

        info!("Created game {} for {} players", code, max_players);
        Ok(game)
    }

    /// Returns a snapshot of the game; `None` when neither tier knows the code.
    pub async fn get_game(&mut self, code: &str) -> Result<Option<Game>, GameError> {
        let code = normalize_code(code);
        Ok(self.load(&code).await?.map(|game| game.clone()))
    }

    pub async fn verify_game(&mut self, code: &str) -> Result<bool, GameError> {
        let code = normalize_code(code);
        Ok(self.load(&code).await?.is_some())
    }

    /// Marks the game ended and purges it from the cache, returning the
    /// clients whose sessions were bound to it. `None` if the game is absent.
    pub async fn end_game(
        &mut self,
        code: &str,
        sessions: &SessionStore,
    ) -> Result<Option<Vec<ClientId>>, GameError> {
        let code = normalize_code(code);
        if self.load(&code).await?.is_none() {
            return Ok(None);
        }

        self.store.update_phase(&code, Phase::Ended).await?;
        let bound = sessions.clients_in_game(&code);
        self.cache.remove(&code);

        info!("Ended game {} ({} sessions bound)", code, bound.len());
        Ok(Some(bound))
    }

    pub async fn update_game_phase(&mut self, code: &str, phase: Phase) -> Result<(), GameError> {
        let code = normalize_code(code);
        self.require(&code).await?;

        // The phase drives client navigation: never update the cache past a failed write.
        self.store.update_phase(&code, phase).await?;
        if let Some(game) = self.cache.get_mut(&code) {
            game.phase = phase;
        }

        info!("Game {} moved to phase {}", code, phase);
        Ok(())
    }

    /// Admits a player. Checks run existence, then capacity, then name.
    pub async fn add_player(
        &mut self,
        code: &str,
        player: Player,
    ) -> Result<Vec<Player>, GameError> {
        let code = normalize_code(code);
        let name = player.name.trim().to_string();
        if name.is_empty() {
            return Err(GameError::InvalidRequest("Player name is required".to_string()));
        }

        let game = self.require(&code).await?;
        if game.is_full() {
            return Err(GameError::GameFull(code));
        }
        if game.has_player_named(&name) {
            return Err(GameError::NameTaken(name));
        }
        if game.player(&player.id).is_some() {
            return Err(GameError::InvalidRequest(format!(
                "Player {} has already joined",
                player.id
            )));
        }

        let player = Player::new(player.id, name);
        self.store.insert_player(&code, &player).await?;

        let game = self.require(&code).await?;
        info!("Player {} ({}) joined game {}", player.name, player.id, code);
        game.players.push(player);
        Ok(game.players.clone())
    }

    /// Idempotent: removing an absent player returns the unchanged list.
    pub async fn remove_player(
        &mut self,
        code: &str,
        player_id: &str,
    ) -> Result<Vec<Player>, GameError> {
        let code = normalize_code(code);
        let game = self.require(&code).await?;
        if game.player(player_id).is_none() {
            debug!("Player {} already absent from game {}", player_id, code);
            return Ok(game.players.clone());
        }

        self.store.delete_player(&code, player_id).await?;

        let game = self.require(&code).await?;
        game.players.retain(|p| p.id != player_id);
        info!("Player {} removed from game {}", player_id, code);
        Ok(game.players.clone())
    }

    /// Replaces existing player records (roles, tasks, liveness) in one step.
    /// Unknown player ids are rejected before anything is written.
    pub async fn update_players(
        &mut self,
        code: &str,
        updated: Vec<Player>,
    ) -> Result<Vec<Player>, GameError> {
        let code = normalize_code(code);
        let game = self.require(&code).await?;
        if let Some(unknown) = updated.iter().find(|p| game.player(&p.id).is_none()) {
            return Err(GameError::PlayerNotFound(unknown.id.clone()));
        }

        for player in &updated {
            self.store.update_player(&code, player).await?;
        }

        let game = self.require(&code).await?;
        for player in updated {
            if let Some(slot) = game.players.iter_mut().find(|p| p.id == player.id) {
                *slot = player;
            }
        }
        Ok(game.players.clone())
    }

    /// Stores the assigned roster and moves the game to `playing` as one
    /// change: the cache sees neither until both writes have landed.
    pub async fn start_game(
        &mut self,
        code: &str,
        assigned: Vec<Player>,
    ) -> Result<Vec<Player>, GameError> {
        let code = normalize_code(code);
        let game = self.require(&code).await?;
        if let Some(unknown) = assigned.iter().find(|p| game.player(&p.id).is_none()) {
            return Err(GameError::PlayerNotFound(unknown.id.clone()));
        }

        for player in &assigned {
            self.store.update_player(&code, player).await?;
        }
        self.store.update_phase(&code, Phase::Playing).await?;

        let game = self.require(&code).await?;
        for player in assigned {
            if let Some(slot) = game.players.iter_mut().find(|p| p.id == player.id) {
                *slot = player;
            }
        }
        game.phase = Phase::Playing;

        info!("Game {} started with {} players", code, game.players.len());
        Ok(game.players.clone())
    }

    /// Number of games currently held in memory.
    pub fn cached_games(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::SessionData;
    use crate::store::{FlakyStore, MemoryStore};
    use shared::Role;
    use tokio_test::{assert_err, assert_ok};

    fn rooms() -> Vec<String> {
        vec!["Cafeteria".to_string(), "Reactor".to_string()]
    }

    async fn registry_with_game(max_players: usize) -> GameRegistry {
        let mut registry = GameRegistry::new(Arc::new(MemoryStore::new()));
        registry
            .create_game("abc123", max_players, rooms())
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_create_game_normalizes_code() {
        let registry = &mut registry_with_game(4).await;
        let game = registry.get_game("ABC123").await.unwrap().unwrap();
        assert_eq!(game.code, "ABC123");
        assert_eq!(game.phase, Phase::Lobby);
        assert!(game.players.is_empty());
        assert!(registry.verify_game(" abc123").await.unwrap());
        assert!(!registry.verify_game("ZZZ").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_duplicate_leaves_original_untouched() {
        let mut registry = registry_with_game(4).await;
        registry
            .add_player("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();

        let result = registry.create_game("ABC123", 10, vec!["Lab".to_string()]).await;
        assert_eq!(
            result,
            Err(GameError::GameAlreadyExists("ABC123".to_string()))
        );

        let game = registry.get_game("ABC123").await.unwrap().unwrap();
        assert_eq!(game.max_players, 4);
        assert_eq!(game.rooms, rooms());
        assert_eq!(game.players.len(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_detected_in_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_game(&Game::new("ABC123", 5, rooms()))
            .await
            .unwrap();

        let mut registry = GameRegistry::new(store);
        assert_eq!(registry.cached_games(), 0);
        let result = registry.create_game("abc123", 4, rooms()).await;
        assert!(matches!(result, Err(GameError::GameAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_game_validates_settings() {
        let mut registry = GameRegistry::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            registry.create_game("A", 3, rooms()).await,
            Err(GameError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry.create_game("A", 16, rooms()).await,
            Err(GameError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry.create_game("  ", 4, rooms()).await,
            Err(GameError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry.create_game("A", 4, vec![" ".to_string()]).await,
            Err(GameError::InvalidRequest(_))
        ));
        assert_ok!(registry.create_game("A", 15, rooms()).await);
    }

    #[tokio::test]
    async fn test_cache_miss_loads_from_store() {
        let store = Arc::new(MemoryStore::new());
        let mut game = Game::new("XYZ", 6, rooms());
        game.players.push(Player::new("p1", "Alice"));
        store.insert_game(&game).await.unwrap();

        let mut registry = GameRegistry::new(store);
        let loaded = registry.get_game("xyz").await.unwrap().unwrap();
        assert_eq!(loaded, game);
        assert_eq!(registry.cached_games(), 1);
    }

    #[tokio::test]
    async fn test_add_player_full_game() {
        let mut registry = registry_with_game(4).await;
        for (i, name) in ["Alice", "Bob", "Carol", "Dave"].iter().enumerate() {
            assert_ok!(
                registry
                    .add_player("ABC123", Player::new(format!("p{}", i), *name))
                    .await
            );
        }

        let result = registry.add_player("ABC123", Player::new("p9", "Eve")).await;
        assert_eq!(result, Err(GameError::GameFull("ABC123".to_string())));
        let game = registry.get_game("ABC123").await.unwrap().unwrap();
        assert_eq!(game.players.len(), 4);
    }

    #[tokio::test]
    async fn test_add_player_capacity_checked_before_name() {
        let mut registry = registry_with_game(4).await;
        for (i, name) in ["Alice", "Bob", "Carol", "Dave"].iter().enumerate() {
            registry
                .add_player("ABC123", Player::new(format!("p{}", i), *name))
                .await
                .unwrap();
        }

        let result = registry.add_player("ABC123", Player::new("p9", "Alice")).await;
        assert!(matches!(result, Err(GameError::GameFull(_))));
    }

    #[tokio::test]
    async fn test_add_player_duplicate_name() {
        let mut registry = registry_with_game(4).await;
        registry
            .add_player("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();

        let result = registry.add_player("ABC123", Player::new("p2", "Alice")).await;
        assert_eq!(result, Err(GameError::NameTaken("Alice".to_string())));

        // Names are case-sensitive as entered.
        assert_ok!(registry.add_player("ABC123", Player::new("p3", "alice")).await);
        let game = registry.get_game("ABC123").await.unwrap().unwrap();
        assert_eq!(game.players.len(), 2);
    }

    #[tokio::test]
    async fn test_add_player_unknown_game() {
        let mut registry = GameRegistry::new(Arc::new(MemoryStore::new()));
        let result = registry.add_player("NOPE", Player::new("p1", "Alice")).await;
        assert_eq!(result, Err(GameError::GameNotFound("NOPE".to_string())));
    }

    #[tokio::test]
    async fn test_add_player_resets_client_supplied_role() {
        let mut registry = registry_with_game(4).await;
        let mut player = Player::new("p1", "  Alice ");
        player.role = shared::Role::Impostor;

        let players = registry.add_player("ABC123", player).await.unwrap();
        assert_eq!(players[0].name, "Alice");
        assert_eq!(players[0].role, shared::Role::Unassigned);
    }

    #[tokio::test]
    async fn test_remove_player_is_idempotent() {
        let mut registry = registry_with_game(4).await;
        registry
            .add_player("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();
        registry
            .add_player("ABC123", Player::new("p2", "Bob"))
            .await
            .unwrap();

        let players = registry.remove_player("ABC123", "p1").await.unwrap();
        assert_eq!(players, vec![Player::new("p2", "Bob")]);

        let again = registry.remove_player("ABC123", "p1").await.unwrap();
        assert_eq!(again, players);

        assert!(matches!(
            registry.remove_player("NOPE", "p1").await,
            Err(GameError::GameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let mut registry = GameRegistry::new(store.clone());
        registry.create_game("ABC", 4, rooms()).await.unwrap();
        registry
            .add_player("ABC", Player::new("p1", "Alice"))
            .await
            .unwrap();

        store.set_failing(true);

        assert_err!(registry.add_player("ABC", Player::new("p2", "Bob")).await);
        assert_err!(registry.remove_player("ABC", "p1").await);
        let phase_change = registry.update_game_phase("ABC", Phase::Playing).await;
        assert!(matches!(phase_change, Err(GameError::Store(_))));

        let game = registry.get_game("ABC").await.unwrap().unwrap();
        assert_eq!(game.phase, Phase::Lobby);
        assert_eq!(game.players, vec![Player::new("p1", "Alice")]);
    }

    #[tokio::test]
    async fn test_start_game_is_all_or_nothing() {
        let store = Arc::new(FlakyStore::default());
        let mut registry = GameRegistry::new(store.clone());
        registry.create_game("ABC", 4, rooms()).await.unwrap();
        registry
            .add_player("ABC", Player::new("p1", "Alice"))
            .await
            .unwrap();

        let mut assigned = Player::new("p1", "Alice");
        assigned.role = Role::Impostor;

        store.set_failing_phase(true);
        let result = registry.start_game("ABC", vec![assigned.clone()]).await;
        assert!(matches!(result, Err(GameError::Store(_))));

        let game = registry.get_game("ABC").await.unwrap().unwrap();
        assert_eq!(game.phase, Phase::Lobby);
        assert_eq!(game.players[0].role, Role::Unassigned);

        store.set_failing_phase(false);
        let players = registry.start_game("ABC", vec![assigned]).await.unwrap();
        assert_eq!(players[0].role, Role::Impostor);
        let game = registry.get_game("ABC").await.unwrap().unwrap();
        assert_eq!(game.phase, Phase::Playing);
    }

    #[tokio::test]
    async fn test_end_game_returns_bound_sessions_and_purges() {
        let mut registry = registry_with_game(4).await;
        let mut sessions = SessionStore::new();
        sessions.save_session("admin", SessionData::admin("ABC123"));
        sessions.save_session("c1", SessionData::player("ABC123", "p1"));
        sessions.save_session("c2", SessionData::player("OTHER", "p2"));

        let mut bound = registry.end_game("abc123", &sessions).await.unwrap().unwrap();
        bound.sort();
        assert_eq!(bound, vec!["admin".to_string(), "c1".to_string()]);

        assert_eq!(registry.cached_games(), 0);
        assert_eq!(registry.get_game("ABC123").await.unwrap(), None);
        assert_eq!(registry.end_game("ABC123", &sessions).await.unwrap(), None);

        // Ended codes may be reused.
        assert_ok!(registry.create_game("ABC123", 4, rooms()).await);
    }

    #[tokio::test]
    async fn test_update_players_rejects_unknown_ids() {
        let mut registry = registry_with_game(4).await;
        registry
            .add_player("ABC123", Player::new("p1", "Alice"))
            .await
            .unwrap();

        let mut alice = Player::new("p1", "Alice");
        alice.role = shared::Role::Crewmate;
        let result = registry
            .update_players("ABC123", vec![alice.clone(), Player::new("ghost", "Ghost")])
            .await;
        assert_eq!(result, Err(GameError::PlayerNotFound("ghost".to_string())));

        let players = registry.update_players("ABC123", vec![alice]).await.unwrap();
        assert_eq!(players[0].role, shared::Role::Crewmate);
    }
}
