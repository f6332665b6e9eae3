//! registry::tables
//!
//! Logical schema of the catalog.
//!
//! # Tables
//!
//! | Table                  | Contents                                           |
//! |------------------------|----------------------------------------------------|
//! | `dataset_type`         | name, storage class, dimension names (JSON)        |
//! | `run`                  | run id, origin, name, provenance                   |
//! | `collection`           | every collection name (runs included)              |
//! | `dataset`              | id, origin, type, run, content hash, one column per dimension |
//! | `dataset_collection`   | membership; unique per (content hash, collection)  |
//! | `dataset_composition`  | parent/component links                             |
//! | `dataset_location`     | datastore name per dataset                         |
//! | `<element>`            | one table per dimension element with a table       |
//! | `<element>_skypix_overlap` | sky pixels overlapping a spatial element's regions |
//!
//! The content-hash uniqueness of `dataset_collection` is what makes a
//! (dataset type, data id) pair unique within a collection.

use crate::core::dimensions::{record_columns, DimensionElement, DimensionUniverse};
use crate::core::types::FieldKind;
use crate::db::{FieldSpec, TableSpec};

pub const DATASET_TYPE: &str = "dataset_type";
pub const RUN: &str = "run";
pub const COLLECTION: &str = "collection";
pub const DATASET: &str = "dataset";
pub const DATASET_COLLECTION: &str = "dataset_collection";
pub const DATASET_COMPOSITION: &str = "dataset_composition";
pub const DATASET_LOCATION: &str = "dataset_location";

/// Column holding the sky pixel index in overlap tables.
pub const SKYPIX: &str = "skypix";

/// Names reserved for the fixed catalog tables.
pub const RESERVED: &[&str] = &[
    DATASET_TYPE,
    RUN,
    COLLECTION,
    DATASET,
    DATASET_COLLECTION,
    DATASET_COMPOSITION,
    DATASET_LOCATION,
];

/// Name of a spatial element's overlap table.
pub fn overlap_table(element: &str) -> String {
    format!("{}_skypix_overlap", element)
}

/// Every table of a catalog over `universe`, parents before children.
pub fn catalog_tables(universe: &DimensionUniverse) -> Vec<TableSpec> {
    let mut tables = Vec::new();
    for element in universe.elements().filter(|e| e.has_table) {
        tables.push(dimension_table(universe, element));
        if element.spatial {
            tables.push(overlap_table_spec(universe, element));
        }
    }
    tables.extend([
        dataset_type_table(),
        collection_table(),
        run_table(),
        dataset_table(universe),
        dataset_collection_table(),
        dataset_composition_table(),
        dataset_location_table(),
    ]);
    tables
}

fn key_kind(universe: &DimensionUniverse, name: &str) -> FieldKind {
    universe
        .element(name)
        .map_or(FieldKind::Str, |e| e.key.kind.into())
}

fn dataset_type_table() -> TableSpec {
    TableSpec::new(DATASET_TYPE)
        .field(FieldSpec::new("dataset_type_name", FieldKind::Str).primary_key())
        .field(FieldSpec::new("storage_class", FieldKind::Str).not_null())
        .field(FieldSpec::new("dimensions", FieldKind::Str).not_null())
}

fn run_table() -> TableSpec {
    TableSpec::new(RUN)
        .field(FieldSpec::new("run_id", FieldKind::Int).autoincrement())
        .field(FieldSpec::new("origin", FieldKind::Int).not_null())
        .field(FieldSpec::new("name", FieldKind::Str).not_null())
        .field(FieldSpec::new("environment", FieldKind::Str))
        .field(FieldSpec::new("pipeline", FieldKind::Str))
        .unique(&["name"])
        .foreign_key(&["name"], COLLECTION, &["name"], false)
}

fn collection_table() -> TableSpec {
    TableSpec::new(COLLECTION).field(FieldSpec::new("name", FieldKind::Str).primary_key())
}

fn dataset_table(universe: &DimensionUniverse) -> TableSpec {
    let mut spec = TableSpec::new(DATASET)
        .field(FieldSpec::new("dataset_id", FieldKind::Int).autoincrement())
        .field(FieldSpec::new("origin", FieldKind::Int).not_null())
        .field(FieldSpec::new("dataset_type_name", FieldKind::Str).not_null())
        .field(FieldSpec::new("run_id", FieldKind::Int).not_null())
        .field(FieldSpec::new("dataset_ref_hash", FieldKind::Bytes).not_null())
        .foreign_key(
            &["dataset_type_name"],
            DATASET_TYPE,
            &["dataset_type_name"],
            false,
        )
        .foreign_key(&["run_id"], RUN, &["run_id"], false)
        .index(&["dataset_type_name", "run_id"]);
    for element in universe.elements() {
        spec = spec.field(FieldSpec::new(element.name.as_str(), element.key.kind.into()));
    }
    spec
}

fn dataset_collection_table() -> TableSpec {
    TableSpec::new(DATASET_COLLECTION)
        .field(FieldSpec::new("dataset_id", FieldKind::Int).primary_key())
        .field(FieldSpec::new("dataset_ref_hash", FieldKind::Bytes).not_null())
        .field(FieldSpec::new("collection", FieldKind::Str).primary_key())
        .unique(&["dataset_ref_hash", "collection"])
        .foreign_key(&["dataset_id"], DATASET, &["dataset_id"], true)
        .foreign_key(&["collection"], COLLECTION, &["name"], false)
}

fn dataset_composition_table() -> TableSpec {
    TableSpec::new(DATASET_COMPOSITION)
        .field(FieldSpec::new("parent_dataset_id", FieldKind::Int).primary_key())
        .field(FieldSpec::new("component_dataset_id", FieldKind::Int).not_null())
        .field(FieldSpec::new("component_name", FieldKind::Str).primary_key())
        .foreign_key(&["parent_dataset_id"], DATASET, &["dataset_id"], true)
        .foreign_key(&["component_dataset_id"], DATASET, &["dataset_id"], true)
}

fn dataset_location_table() -> TableSpec {
    TableSpec::new(DATASET_LOCATION)
        .field(FieldSpec::new("datastore_name", FieldKind::Str).primary_key())
        .field(FieldSpec::new("dataset_id", FieldKind::Int).primary_key())
        .foreign_key(&["dataset_id"], DATASET, &["dataset_id"], false)
}

/// Table of one dimension element.
///
/// The primary key is the element's required dependencies followed by its
/// own key. Foreign keys point at every dependency with a table whose key
/// columns are all present.
pub fn dimension_table(universe: &DimensionUniverse, element: &DimensionElement) -> TableSpec {
    let columns = record_columns(element, |name| universe.element(name).map(|e| e.key.kind));
    let primary_key = element.primary_key_names();

    let mut spec = TableSpec::new(element.name.as_str());
    for (name, kind, nullable) in &columns {
        let mut field = FieldSpec::new(name.as_str(), *kind);
        if primary_key.contains(&name.as_str()) {
            field = field.primary_key();
        } else if !nullable {
            field = field.not_null();
        }
        spec = spec.field(field);
    }

    for dependency in element.dependencies() {
        let Some(target) = universe.element(dependency).filter(|e| e.has_table) else {
            continue;
        };
        let target_key = target.primary_key_names();
        if target_key
            .iter()
            .all(|c| columns.iter().any(|(name, _, _)| name == c))
        {
            spec = spec.foreign_key(&target_key, &target.name, &target_key, false);
        }
    }
    spec
}

fn overlap_table_spec(universe: &DimensionUniverse, element: &DimensionElement) -> TableSpec {
    let primary_key = element.primary_key_names();
    let mut spec = TableSpec::new(overlap_table(&element.name));
    for name in &primary_key {
        spec = spec.field(FieldSpec::new(*name, key_kind(universe, name)).primary_key());
    }
    spec.field(FieldSpec::new(SKYPIX, FieldKind::Int).primary_key())
        .foreign_key(&primary_key, &element.name, &primary_key, true)
        .index(&[SKYPIX])
}
