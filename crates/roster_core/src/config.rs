//! Core configuration and store bootstrap.
//!
//! # Responsibility
//! - Describe how to open the store and where to log (`CoreConfig`).
//! - Turn a configuration into a ready `SqliteStore`.
//!
//! # Invariants
//! - `default_page_size` is positive and never exceeds `max_page_size`.
//! - A missing `database_path` means an in-memory database.

use crate::db::{open_db, open_db_in_memory, StoreResult};
use crate::logging::{default_log_level, init_logging, LoggingError};
use crate::page::PageRequest;
use crate::query::sort::Sort;
use crate::repo::RepoResult;
use crate::store::SqliteStore;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration error raised while loading or validating `CoreConfig`.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// SQLite file; `None` opens an in-memory database.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
    /// Log every executed statement at `debug`.
    pub log_sql: bool,
    pub busy_timeout_ms: u64,
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            log_sql: false,
            busy_timeout_ms: 5_000,
            default_page_size: 20,
            max_page_size: 2_000,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON document; absent fields keep defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid(
                "default_page_size must be at least 1".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Page request with the size defaulted and capped by this config.
    pub fn page_request(
        &self,
        page: u64,
        size: Option<u64>,
        sort: Sort,
    ) -> RepoResult<PageRequest> {
        let size = size
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        PageRequest::sorted(page, size, sort)
    }

    /// Starts file logging when `log_dir` is set.
    pub fn init_logging(&self) -> Result<(), LoggingError> {
        match &self.log_dir {
            Some(log_dir) => init_logging(&self.log_level, log_dir),
            None => Ok(()),
        }
    }
}

/// Opens and migrates the configured database.
pub fn open_store(config: &CoreConfig) -> StoreResult<SqliteStore> {
    let conn = match &config.database_path {
        Some(path) => open_db(path, config.busy_timeout())?,
        None => open_db_in_memory()?,
    };
    info!(
        "event=store_open module=config status=ok in_memory={} log_sql={}",
        config.database_path.is_none(),
        config.log_sql
    );
    Ok(SqliteStore::new(conn).with_sql_logging(config.log_sql))
}

/// In-memory store with default settings.
pub fn open_store_in_memory() -> StoreResult<SqliteStore> {
    open_store(&CoreConfig::default())
}
