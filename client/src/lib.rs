//! # Lobby Client Library
//!
//! A headless client for the lobby coordinator. It speaks the same JSON event
//! protocol as the browser front end and is used for scripting games from the
//! command line and for end-to-end tests.
//!
//! ## Module Organization
//!
//! ### Identity Module (`identity`)
//! Keeps the long-lived client id and the last game session on disk, the way
//! a browser keeps them in local storage:
//! - Random client id generated once
//! - Remembered game code, player id and admin flag
//!
//! ### Network Module (`network`)
//! Wraps a WebSocket connection to the coordinator:
//! - Sending client events and reading server events
//! - Request helpers for create, join, verify and end
//! - Session restore after a restart (verify, register, rejoin)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::identity::ClientIdentity;
//! use client::network::GameClient;
//! use shared::Player;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = ClientIdentity::generate();
//!     let mut client = GameClient::connect("ws://127.0.0.1:8080", identity.client_id).await?;
//!     client.join_game("ABC123", Player::new("p1", "Alice")).await?;
//!     Ok(())
//! }
//! ```

pub mod identity;
pub mod network;
