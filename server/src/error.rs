//! Error kinds surfaced to clients as `game-error` events

use thiserror::Error;

/// Failure of the durable collaborator behind the game cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    #[error("durable store rejected write: {0}")]
    WriteRejected(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Game {0} not found")]
    GameNotFound(String),
    #[error("A game with code {0} already exists")]
    GameAlreadyExists(String),
    #[error("Game {0} is full")]
    GameFull(String),
    #[error("The name {0} is already taken")]
    NameTaken(String),
    #[error("Session is no longer valid")]
    SessionInvalid,
    #[error("Player {0} not found")]
    PlayerNotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    /// Stable identifier sent alongside the message so clients can branch on it.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::GameNotFound(_) => "GameNotFound",
            GameError::GameAlreadyExists(_) => "GameAlreadyExists",
            GameError::GameFull(_) => "GameFull",
            GameError::NameTaken(_) => "NameTaken",
            GameError::SessionInvalid => "SessionInvalid",
            GameError::PlayerNotFound(_) => "PlayerNotFound",
            GameError::InvalidRequest(_) => "InvalidRequest",
            GameError::Store(_) => "Internal",
        }
    }

    /// Message shown to the client. Store details stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            GameError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
