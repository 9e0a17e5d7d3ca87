//! # Lobby Coordinator Server Library
//!
//! This library provides the server-side coordination layer for small
//! multiplayer party-game sessions. An admin creates a game, players join,
//! leave and come back over a persistent WebSocket connection, and the game
//! moves through its phases (lobby, playing, meeting, ended).
//!
//! ## Core Responsibilities
//!
//! ### Three Identities, Kept Consistent
//! Every player is known under three identities that live for different
//! lengths of time:
//! - a long-lived client identity that survives page reloads (`session_store`)
//! - a per-connection identity that dies with the socket (`connection_index`)
//! - game and player membership, the authoritative state (`game_registry`)
//!
//! ### Surviving Network Blips
//! A dropped connection does not remove a player straight away. The
//! `reconnection` supervisor keeps their seat for a grace period (30 seconds
//! by default) and only a missed deadline turns into a removal.
//!
//! ### Broadcasting
//! Every connection that joined a game is subscribed to its channel. State
//! changes are broadcast to the channel only after the change is visible in
//! the registry.
//!
//! ## Architecture Design
//!
//! ### Single Coordinator Task
//! One task owns the `EventRouter` and with it every registry. Connection
//! tasks and grace timers talk to it through channels, and each event is
//! handled to completion before the next one starts. No locks guard the
//! registries; exclusive ownership does.
//!
//! ### Write-Through Cache
//! Games live in memory and are mirrored to a `GameStore`. The cache is
//! consulted first, the store only on a miss, and every mutation writes the
//! store before updating the cache so a failed write never leaves a partial
//! change behind.
//!
//! ## Module Organization
//!
//! - `config`: listener address and timing knobs
//! - `error`: error kinds surfaced to clients
//! - `store`: durable store interface and an in-memory backend
//! - `game_registry`: game cache and player admission rules
//! - `session_store`: client identity to session mapping
//! - `connection_index`: live connection to player mapping
//! - `reconnection`: grace period state machine per player
//! - `roles`: role and task assignment at game start
//! - `router`: inbound event dispatch and game channels
//! - `network`: WebSocket transport and the coordinator loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default(), Arc::new(MemoryStore::new())).await?;
//!     server.run().await.map_err(|e| e as Box<dyn std::error::Error>)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_index;
pub mod error;
pub mod game_registry;
pub mod network;
pub mod reconnection;
pub mod roles;
pub mod router;
pub mod session_store;
pub mod store;
