//! registry::error
//!
//! Error taxonomy of registry operations.

use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::datasets::DatasetError;
use crate::core::dimensions::DimensionError;
use crate::core::types::TypeError;
use crate::db::DbError;
use crate::query::QueryError;

/// Errors from registry operations.
///
/// Backend failures (integrity violations included) are wrapped in
/// [`RegistryError::Db`] without translation; use
/// [`RegistryError::is_integrity_violation`] to detect them.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A definition or dataset conflicts with one already stored.
    #[error("conflicting definition: {0}")]
    ConflictingDefinition(String),

    /// The operation would leave records referring to a removed dataset.
    #[error("orphaned record: {0}")]
    OrphanedRecord(String),

    /// A data id, record, run, or collection could not be resolved.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// No dataset type, table, or dimension element has this name.
    #[error("unknown name: {0}")]
    UnknownName(String),

    #[error(transparent)]
    Dimension(DimensionError),

    #[error(transparent)]
    Dataset(DatasetError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stored catalog content could not be decoded.
    #[error("corrupt catalog content: {0}")]
    Serialization(String),
}

impl RegistryError {
    /// Check if this is a lookup-class error.
    pub fn is_lookup(&self) -> bool {
        match self {
            RegistryError::Lookup(_) => true,
            RegistryError::Dimension(e) => e.is_lookup(),
            RegistryError::Dataset(DatasetError::Dimension(e)) => e.is_lookup(),
            _ => false,
        }
    }

    /// Check if this is an unknown-name error.
    pub fn is_unknown_name(&self) -> bool {
        matches!(
            self,
            RegistryError::UnknownName(_)
                | RegistryError::Dimension(DimensionError::UnknownDimension(_))
        )
    }

    /// Check if this is an untranslated backend integrity violation.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, RegistryError::Db(e) if e.is_integrity_violation())
    }

    /// Check if a write was refused by a read-only connection.
    pub fn is_read_only(&self) -> bool {
        matches!(self, RegistryError::Db(DbError::ReadOnly))
    }
}

impl From<DimensionError> for RegistryError {
    fn from(err: DimensionError) -> Self {
        RegistryError::Dimension(err)
    }
}

impl From<DatasetError> for RegistryError {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::Dimension(e) => RegistryError::Dimension(e),
            other => RegistryError::Dataset(other),
        }
    }
}

impl From<TypeError> for RegistryError {
    fn from(err: TypeError) -> Self {
        RegistryError::Dataset(DatasetError::InvalidName(err))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}
