//! Client identity persisted across runs
//!
//! Plays the part browser storage plays for the web client: the client id is
//! generated once and reused forever, and the last game session is kept so a
//! restarted client can find its seat again.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{ClientId, PlayerId};
use std::fs;
use std::io;
use std::path::Path;

const ID_LENGTH: usize = 16;

/// Generates an opaque random identifier.
pub fn generate_id<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub game_code: String,
    pub player_id: Option<PlayerId>,
    pub is_admin: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: ClientId,
    pub session: Option<StoredSession>,
}

impl ClientIdentity {
    pub fn generate() -> Self {
        Self {
            client_id: generate_id(&mut rand::thread_rng()),
            session: None,
        }
    }

    /// Loads the identity stored at `path`, creating and saving a fresh one if
    /// the file is missing or unreadable.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => match bincode::deserialize::<ClientIdentity>(&bytes) {
                Ok(identity) => return Ok(identity),
                Err(e) => log::warn!("Ignoring unreadable identity file {:?}: {}", path, e),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let identity = Self::generate();
        identity.save(path)?;
        log::info!("Created new client identity {}", identity.client_id);
        Ok(identity)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, bytes)
    }

    pub fn remember_player(&mut self, game_code: &str, player_id: &str) {
        self.session = Some(StoredSession {
            game_code: game_code.to_string(),
            player_id: Some(player_id.to_string()),
            is_admin: false,
        });
    }

    pub fn remember_admin(&mut self, game_code: &str) {
        self.session = Some(StoredSession {
            game_code: game_code.to_string(),
            player_id: None,
            is_admin: true,
        });
    }

    pub fn forget_session(&mut self) {
        self.session = None;
    }
}
