//! dimcat - a dimension-aware metadata catalog for scientific datasets
//!
//! dimcat records which datasets exist, where in a multi-dimensional
//! observational space each one lives (instrument, detector, visit, sky
//! patch, ...), which collections group them, and where datastores keep
//! them. Queries find the coordinates and datasets satisfying dataset
//! availability and predicate constraints.
//!
//! # Architecture
//!
//! The codebase is layered, leaves first:
//!
//! - [`core`] - Value types: dimension universe, graphs, coordinates,
//!   records, packers, dataset types and refs, storage classes, config
//! - [`db`] - Database abstraction with nested transactions and identifier
//!   shrinking; SQLite backend
//! - [`query`] - Predicate parser and join planner
//! - [`registry`] - The catalog: schema, datasets, collections, dimension
//!   records, opaque tables, queries
//!
//! # Correctness Invariants
//!
//! 1. Dimension dependencies form a DAG
//! 2. A dataset's identity is its type plus data id; no collection holds two
//!    datasets with the same identity
//! 3. Every mutation runs inside a transaction scope; a failure unwinds
//!    exactly to the nearest scope
//! 4. Backend integrity errors propagate unchanged

pub mod core;
pub mod db;
pub mod query;
pub mod registry;

pub use crate::core::datasets::{DatasetRef, DatasetType};
pub use crate::core::dimensions::{DataCoordinate, DimensionGraph, DimensionUniverse, RawDataId};
pub use crate::registry::{Registry, RegistryError};

/// Build a [`RawDataId`] from `key => value` pairs.
///
/// ```
/// use dimcat::data_id;
///
/// let id = data_id! {"instrument" => "DummyCam", "detector" => 1};
/// assert_eq!(id.get("detector").and_then(|v| v.as_int()), Some(1));
/// ```
#[macro_export]
macro_rules! data_id {
    () => {
        $crate::core::dimensions::RawDataId::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::core::dimensions::RawDataId::new()
            $(.with($key, $value))+
    };
}

/// Build a [`RawRecord`](crate::core::dimensions::RawRecord) from
/// `field => value` pairs.
///
/// ```
/// use dimcat::core::types::FieldValue;
/// use dimcat::record;
///
/// let rec = record! {"instrument" => "DummyCam", "id" => 1, "seeing" => 0.7};
/// assert_eq!(rec["seeing"], FieldValue::Float(0.7));
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::core::dimensions::RawRecord::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::core::dimensions::RawRecord::new();
        $(record.insert(::std::string::String::from($key), $crate::core::types::FieldValue::from($value));)+
        record
    }};
}
