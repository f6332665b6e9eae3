//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! A registry configuration has two tables:
//! - **`[db]`**: the [`DatabaseDescriptor`] (backend, target, writeable, origin)
//! - **`[registry]`**: registry behaviour ([`RegistrySection`])
//!
//! Credential lookup is not handled here; the descriptor's target must
//! already be resolved.
//!
//! # Example
//!
//! ```
//! use dimcat::core::config::RegistryConfig;
//!
//! let config = RegistryConfig::from_toml_str(
//!     r#"
//!     [db]
//!     target = ":memory:"
//!     origin = 1
//!
//!     [registry]
//!     query_page_size = 100
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.db.origin, 1);
//! assert_eq!(config.query_page_size(), 100);
//! assert!(config.create());
//! ```

pub mod schema;

pub use schema::{Backend, DatabaseDescriptor, RegistrySection, IN_MEMORY};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::dimensions::UniverseConfig;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Complete registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Connection descriptor
    #[serde(default)]
    pub db: DatabaseDescriptor,

    /// Registry settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySection>,
}

impl RegistryConfig {
    /// Configuration for a given descriptor with default settings.
    pub fn new(db: DatabaseDescriptor) -> Self {
        Self { db, registry: None }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(contents).map_err(|e| {
            ConfigError::ParseError {
                path: PathBuf::from("<string>"),
                message: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: RegistryConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "loaded registry config");
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.db.validate()?;
        if let Some(ref registry) = self.registry {
            registry.validate()?;
        }
        Ok(())
    }

    /// Write the configuration atomically.
    ///
    /// Creates parent directories if needed. Uses atomic write
    /// (write to temp file, then rename) to prevent corruption.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    /// Check if missing tables should be created on open.
    ///
    /// Defaults to `true` if not configured.
    pub fn create(&self) -> bool {
        self.registry
            .as_ref()
            .and_then(|r| r.create)
            .unwrap_or(true)
    }

    /// Rows fetched per query page.
    ///
    /// Defaults to [`schema::DEFAULT_PAGE_SIZE`] if not configured.
    pub fn query_page_size(&self) -> usize {
        self.registry
            .as_ref()
            .and_then(|r| r.query_page_size)
            .unwrap_or(schema::DEFAULT_PAGE_SIZE)
    }

    /// Load the configured dimension universe definition.
    ///
    /// Returns the built-in observational universe when none is configured.
    pub fn universe(&self) -> Result<UniverseConfig, ConfigError> {
        let Some(path) = self.registry.as_ref().and_then(|r| r.universe.as_ref()) else {
            return Ok(UniverseConfig::observational());
        };
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        UniverseConfig::from_toml_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}
