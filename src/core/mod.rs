//! core
//!
//! Core domain types and value semantics for the catalog.
//!
//! # Modules
//!
//! - [`types`] - Strong types: DatasetId, DataValue, Timespan, ContentHash
//! - [`graph`] - Dependency graph with cycle detection
//! - [`dimensions`] - Dimension ontology, graphs, coordinates, packers
//! - [`storage_class`] - Storage class definitions and registry
//! - [`datasets`] - Dataset types and dataset references
//! - [`run`] - Processing runs
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at construction time
//! - Value types are immutable; "modifying" operations return new values
//! - Equality and hashing are derived explicitly per type

pub mod config;
pub mod datasets;
pub mod dimensions;
pub mod graph;
pub mod run;
pub mod storage_class;
pub mod types;
