//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Database Descriptor
//!
//! The `[db]` table describes the connection: which backend, where it
//! lives, whether writes are allowed, and the origin tag stamped on new
//! records.
//!
//! # Validation
//!
//! Config values are validated after parsing (e.g., the table prefix must be
//! a valid SQL identifier fragment).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Target that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Smallest identifier limit a backend may declare.
pub const MIN_IDENTIFIER_LENGTH: usize = 16;

/// Default number of rows fetched per query page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Supported database backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
}

impl Backend {
    /// Names accepted in configuration.
    pub const VALID_NAMES: &'static [&'static str] = &["sqlite"];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_target() -> String {
    IN_MEMORY.to_string()
}

/// Database connection descriptor.
///
/// # Example
///
/// ```toml
/// backend = "sqlite"
/// target = "/data/repo/catalog.sqlite3"
/// writeable = true
/// origin = 2
/// prefix = "cat_"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseDescriptor {
    /// Backend kind
    #[serde(default)]
    pub backend: Backend,

    /// Connection target (file path or `:memory:`)
    #[serde(default = "default_target")]
    pub target: String,

    /// Whether the connection accepts writes
    #[serde(default = "default_true")]
    pub writeable: bool,

    /// Tag stamped on dataset and run records created through this connection
    #[serde(default)]
    pub origin: i64,

    /// Prefix applied to every table name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Override of the backend's identifier length limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_identifier_length: Option<usize>,
}

impl Default for DatabaseDescriptor {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl DatabaseDescriptor {
    /// A writeable private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Sqlite,
            target: default_target(),
            writeable: true,
            origin: 0,
            prefix: None,
            max_identifier_length: None,
        }
    }

    /// A writeable SQLite database file.
    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: path.into().to_string_lossy().into_owned(),
            ..Self::in_memory()
        }
    }

    pub fn with_origin(mut self, origin: i64) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writeable = false;
        self
    }

    pub fn with_max_identifier_length(mut self, length: usize) -> Self {
        self.max_identifier_length = Some(length);
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.target == IN_MEMORY
    }

    /// Validate the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::InvalidValue(
                "db.target cannot be empty".to_string(),
            ));
        }

        if let Some(prefix) = &self.prefix {
            let valid = prefix
                .chars()
                .next()
                .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
                && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid table prefix '{}'",
                    prefix
                )));
            }
        }

        if let Some(length) = self.max_identifier_length {
            if length < MIN_IDENTIFIER_LENGTH {
                return Err(ConfigError::InvalidValue(format!(
                    "max_identifier_length must be at least {}",
                    MIN_IDENTIFIER_LENGTH
                )));
            }
        }

        if self.origin < 0 {
            return Err(ConfigError::InvalidValue(
                "origin cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Registry behaviour settings.
///
/// # Example
///
/// ```toml
/// create = true
/// query_page_size = 500
/// universe = "dimensions.toml"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySection {
    /// Create missing tables on open
    pub create: Option<bool>,

    /// Rows fetched per query page
    pub query_page_size: Option<usize>,

    /// Path to a dimension universe definition (built-in default if absent)
    pub universe: Option<PathBuf>,
}

impl RegistrySection {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_page_size == Some(0) {
            return Err(ConfigError::InvalidValue(
                "query_page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
