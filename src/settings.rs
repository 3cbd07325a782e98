use crate::constants::{DB_FILE, DB_PATH_ENV, DEFAULT_LOG_LEVEL, LOG_LEVEL_ENV};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration for the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Location of the SQLite database file
    pub db_path: PathBuf,
    /// Log filter passed to env_logger (e.g. "info", "userworks_store=debug")
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DB_FILE),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Settings {
    /// Reads `.env` into the process environment if one is found.
    /// Returns the path of the file that was loaded.
    pub fn load_dotenv() -> Option<PathBuf> {
        dotenv::dotenv().ok()
    }

    /// Load settings from the process environment.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = match lookup(DB_PATH_ENV) {
            Some(raw) if raw.trim().is_empty() => {
                return Err(StoreError::Config {
                    message: format!("{} is set but empty", DB_PATH_ENV),
                })
            }
            Some(raw) => PathBuf::from(raw.trim()),
            None => defaults.db_path,
        };

        let log_level = lookup(LOG_LEVEL_ENV)
            .map(|raw| raw.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or(defaults.log_level);

        Ok(Self { db_path, log_level })
    }

    /// Override the database path, e.g. from a CLI flag.
    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }
}
