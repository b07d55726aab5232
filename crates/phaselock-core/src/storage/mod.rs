mod config;
pub mod database;
pub mod memory;
pub mod migrations;

pub use config::{BlockDefaults, Config, TimerSettings};
pub use database::Database;
pub use memory::MemoryStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::timer::{BlockId, BlockSpec, SessionId, SessionState};

/// A persisted block definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(flatten)]
    pub spec: BlockSpec,
    pub created_at: DateTime<Utc>,
}

/// Persistence for block definitions.
pub trait BlockStore: Send + Sync {
    fn insert_block(&self, spec: &BlockSpec) -> Result<Block>;

    fn load_block(&self, id: BlockId) -> Result<Option<Block>>;

    /// All blocks, oldest first.
    fn list_blocks(&self) -> Result<Vec<Block>>;
}

/// Persistence for session records.
pub trait SessionStore: Send + Sync {
    /// Store a new session and return its id. `session.id` is ignored.
    fn insert_session(&self, session: &SessionState) -> Result<SessionId>;

    fn save_session(&self, session: &SessionState) -> Result<()>;

    fn load_session(&self, id: SessionId) -> Result<Option<SessionState>>;

    /// The most recently started session that is running or paused.
    fn find_active_session(&self) -> Result<Option<SessionState>>;
}

/// Returns the PhaseLock data directory, creating it if needed.
///
/// `PHASELOCK_DATA_DIR` wins when set. Otherwise `~/.config/phaselock/`,
/// or `~/.config/phaselock-dev/` with `PHASELOCK_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("PHASELOCK_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("PHASELOCK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("phaselock-dev")
            } else {
                base_dir.join("phaselock")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
