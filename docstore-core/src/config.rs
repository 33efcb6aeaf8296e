//! Database configuration
//!
//! A [`DatabaseConfig`] is either built in code or deserialized from JSON:
//!
//! ```rust
//! use docstore_core::{DatabaseConfig, IdGeneration, LogLevel};
//!
//! let config = DatabaseConfig::new()
//!     .with_id_generation(IdGeneration::AutoIncrement)
//!     .with_log_level(LogLevel::Debug);
//!
//! let parsed = DatabaseConfig::from_json_str(
//!     r#"{"id_generation": "auto_increment", "log_level": "debug"}"#,
//! ).unwrap();
//! assert_eq!(config, parsed);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::LogLevel;

/// How the store assigns `_id` to documents inserted without one
///
/// - **ObjectId**: random 128-bit identifier rendered as `{"$oid": "<hex>"}`
/// - **AutoIncrement**: per-collection counter starting at 1, skipping
///   identifiers that were supplied explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGeneration {
    #[default]
    ObjectId,
    AutoIncrement,
}

/// Options applied when a [`DatabaseCore`](crate::DatabaseCore) is constructed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub id_generation: IdGeneration,

    /// When set, applied through [`set_log_level`](crate::set_log_level) on construction
    pub log_level: Option<LogLevel>,
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_generation(mut self, id_generation: IdGeneration) -> Self {
        self.id_generation = id_generation;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Parse a configuration from a JSON object; missing keys take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
