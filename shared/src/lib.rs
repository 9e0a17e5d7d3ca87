use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const MIN_PLAYERS: usize = 4;
pub const MAX_PLAYERS: usize = 15;
pub const RECONNECT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Opaque player identity generated by the client.
pub type PlayerId = String;
/// Long-lived identity of one browser tab or client installation.
pub type ClientId = String;

/// Normalizes a human-entered game code (surrounding whitespace dropped, uppercased).
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Playing,
    Meeting,
    Ended,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Lobby => "lobby",
            Phase::Playing => "playing",
            Phase::Meeting => "meeting",
            Phase::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unassigned,
    Crewmate,
    Impostor,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub room: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_alive")]
    pub is_alive: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

fn default_alive() -> bool {
    true
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Unassigned,
            is_alive: true,
            tasks: Vec::new(),
        }
    }

    /// The player as other players may see them: role and tasks withheld.
    pub fn public(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            role: Role::Unassigned,
            is_alive: self.is_alive,
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub code: String,
    pub max_players: usize,
    pub phase: Phase,
    pub rooms: Vec<String>,
    pub players: Vec<Player>,
}

impl Game {
    pub fn new(code: &str, max_players: usize, rooms: Vec<String>) -> Self {
        Self {
            code: normalize_code(code),
            max_players,
            phase: Phase::Lobby,
            rooms,
            players: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn has_player_named(&self, name: &str) -> bool {
        self.players.iter().any(|p| p.name == name)
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }
}

/// Events sent by clients over the persistent connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    VerifyGame {
        code: String,
    },
    CreateGame {
        code: String,
        max_players: usize,
        rooms: Vec<String>,
        client_id: ClientId,
    },
    EndGame {
        code: String,
    },
    JoinGame {
        game_code: String,
        player: Player,
        client_id: ClientId,
    },
    RemovePlayer {
        game_code: String,
        player_id: PlayerId,
        client_id: ClientId,
        #[serde(default)]
        is_admin: bool,
    },
    RejoinGame {
        game_code: String,
        player_id: PlayerId,
        client_id: ClientId,
    },
    RegisterSession {
        game_code: String,
        #[serde(default)]
        player_id: Option<PlayerId>,
        client_id: ClientId,
        #[serde(default)]
        is_admin: bool,
    },
    StartGame {
        code: String,
    },
    UpdatePhase {
        code: String,
        phase: Phase,
    },
    CompleteTask {
        game_code: String,
        player_id: PlayerId,
        task_id: String,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::VerifyGame { .. } => "verify-game",
            ClientEvent::CreateGame { .. } => "create-game",
            ClientEvent::EndGame { .. } => "end-game",
            ClientEvent::JoinGame { .. } => "join-game",
            ClientEvent::RemovePlayer { .. } => "remove-player",
            ClientEvent::RejoinGame { .. } => "rejoin-game",
            ClientEvent::RegisterSession { .. } => "register-session",
            ClientEvent::StartGame { .. } => "start-game",
            ClientEvent::UpdatePhase { .. } => "update-phase",
            ClientEvent::CompleteTask { .. } => "complete-task",
        }
    }

    /// Long-lived client identity carried by the event, if any.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            ClientEvent::CreateGame { client_id, .. }
            | ClientEvent::JoinGame { client_id, .. }
            | ClientEvent::RemovePlayer { client_id, .. }
            | ClientEvent::RejoinGame { client_id, .. }
            | ClientEvent::RegisterSession { client_id, .. } => Some(client_id.as_str()),
            _ => None,
        }
    }
}

/// Events pushed by the server, either as a direct reply or a game-wide broadcast.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    GameVerified {
        code: String,
        exists: bool,
    },
    GameCreated {
        code: String,
        max_players: usize,
        rooms: Vec<String>,
        players: Vec<Player>,
    },
    GameEnded {
        code: String,
    },
    JoinGameSuccess {
        game_code: String,
        player: Player,
        players: Vec<Player>,
    },
    PlayersUpdated {
        players: Vec<Player>,
    },
    PlayerRemoved {
        player_id: PlayerId,
    },
    GameState {
        game_code: String,
        players: Vec<Player>,
        phase: Phase,
    },
    PhaseChanged {
        game_code: String,
        phase: Phase,
    },
    RoleAssigned {
        player_id: PlayerId,
        role: Role,
        tasks: Vec<Task>,
    },
    TaskCompleted {
        player_id: PlayerId,
        task_id: String,
    },
    GameError {
        kind: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerEvent::GameError {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}
