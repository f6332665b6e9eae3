//! core::dimensions
//!
//! The dimension ontology and coordinate algebra.
//!
//! # Modules
//!
//! - [`element`] - Element definitions and the serializable universe config
//! - [`universe`] - [`DimensionUniverse`]: validated, immutable ontology
//! - [`graph`] - [`DimensionGraph`]: closure of a set of elements
//! - [`record`] - [`DimensionRecord`]: one row of a dimension table
//! - [`coordinate`] - [`DataCoordinate`] and [`RawDataId`]
//! - [`packer`] - [`DimensionPacker`]: reversible integer encodings
//!
//! # Invariants
//!
//! - Dependencies between elements form a DAG; cycles are rejected when the
//!   universe is built and whenever a closure is extracted
//! - A data coordinate's keys are exactly its graph's required dimensions
//! - Graphs compare equal iff their element sets are equal

pub mod coordinate;
pub mod element;
pub mod graph;
pub mod packer;
pub mod record;
pub mod universe;

pub use coordinate::{DataCoordinate, Expansion, RawDataId};
pub use element::{
    DimensionElement, KeyField, MetadataField, PackedDimension, PackerSpec, TemporalRole,
    UniverseConfig,
};
pub use graph::DimensionGraph;
pub use packer::DimensionPacker;
pub use record::{record_columns, DimensionRecord, RawRecord};
pub use universe::DimensionUniverse;

use thiserror::Error;

use crate::core::graph::GraphError;
use crate::core::types::KeyKind;

/// Errors from dimension and coordinate operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DimensionError {
    /// A dimension name that the universe does not define.
    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    /// Dependency edges form a cycle.
    #[error("dimension dependency cycle: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// The universe definition is inconsistent.
    #[error("invalid dimension definition: {0}")]
    InvalidDefinition(String),

    /// A required dimension value is absent and cannot be derived.
    #[error("data id is missing a value for '{dimension}' (required: {required})")]
    MissingValue { dimension: String, required: String },

    /// A value has the wrong kind for its dimension key.
    #[error("value for '{dimension}' must be {expected:?}")]
    WrongKind { dimension: String, expected: KeyKind },

    /// A record field the element does not declare.
    #[error("element '{element}' has no field '{field}'")]
    UnknownField { element: String, field: String },

    /// A coordinate was built with keys other than its graph's required set.
    #[error("data id keys {actual} do not match required dimensions {required}")]
    KeyMismatch { actual: String, required: String },

    /// An operation needs dimension records the coordinate does not carry.
    #[error("data id is not expanded with a record for '{0}'")]
    MissingRecord(String),

    /// No packer with the given name.
    #[error("unknown packer: {0}")]
    UnknownPacker(String),

    /// A value does not fit in the packer's bounds.
    #[error("value {value} for '{dimension}' is outside packer bound [0, {max})")]
    PackOutOfRange {
        dimension: String,
        value: i64,
        max: i64,
    },

    /// A packed integer does not belong to this packer.
    #[error("packed value {0} is outside this packer's range")]
    UnpackOutOfRange(i64),

    /// The coordinate being packed belongs to a different fixed dimension value.
    #[error("data id does not match packer's fixed value for '{0}'")]
    FixedMismatch(String),
}

impl DimensionError {
    /// Check if this error means a data id could not be resolved.
    ///
    /// These are the lookup-class errors of the catalog taxonomy.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            DimensionError::MissingValue { .. } | DimensionError::MissingRecord(_)
        )
    }
}

impl From<GraphError> for DimensionError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected(path) => DimensionError::CycleDetected(path),
            GraphError::UnknownNode(name) => DimensionError::UnknownDimension(name),
        }
    }
}
