//! registry::datasets
//!
//! Dataset types, datasets, components, and datastore locations.

use std::collections::{BTreeMap, BTreeSet};

use super::tables::{
    DATASET, DATASET_COLLECTION, DATASET_COMPOSITION, DATASET_LOCATION, DATASET_TYPE,
};
use super::{Registry, RegistryError};
use crate::core::datasets::{DatasetError, DatasetRef, DatasetType};
use crate::core::dimensions::{DataCoordinate, RawDataId};
use crate::core::storage_class::StorageClassRef;
use crate::core::types::{ContentHash, DatasetId, FieldValue};
use crate::db::{row, Row};

impl Registry {
    // =========================================================================
    // Dataset types
    // =========================================================================

    /// Add a dataset type to the catalog.
    ///
    /// Returns `true` if the type was inserted and `false` if an identical
    /// type was already registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConflictingDefinition`] if a different type
    /// with the same name exists.
    pub fn register_dataset_type(&self, dataset_type: &DatasetType) -> Result<bool, RegistryError> {
        if dataset_type.dimensions().universe() != &self.universe {
            return Err(RegistryError::ConflictingDefinition(format!(
                "dataset type '{}' uses a different dimension universe",
                dataset_type.name()
            )));
        }

        self.scope(|| {
            if let Some(existing) = self.fetch_dataset_type(dataset_type.name())? {
                if &existing == dataset_type {
                    return Ok(false);
                }
                return Err(RegistryError::ConflictingDefinition(format!(
                    "dataset type '{}' is already registered as {}",
                    dataset_type.name(),
                    existing
                )));
            }

            let dimensions = serde_json::to_string(dataset_type.dimensions().names())?;
            self.db.insert(
                DATASET_TYPE,
                &[row([
                    ("dataset_type_name", dataset_type.name().into()),
                    ("storage_class", dataset_type.storage_class_name().into()),
                    ("dimensions", dimensions.into()),
                ])],
            )?;
            tracing::debug!(name = dataset_type.name(), "registered dataset type");
            Ok(true)
        })
    }

    /// Get a registered dataset type by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownName`] if no such type is registered.
    pub fn get_dataset_type(&self, name: &str) -> Result<DatasetType, RegistryError> {
        self.fetch_dataset_type(name)?
            .ok_or_else(|| RegistryError::UnknownName(format!("dataset type '{}'", name)))
    }

    /// Every registered dataset type, in name order.
    pub fn get_all_dataset_types(&self) -> Result<Vec<DatasetType>, RegistryError> {
        self.db
            .fetch(DATASET_TYPE, &Row::new())?
            .iter()
            .map(|r| self.decode_dataset_type(r))
            .collect()
    }

    fn fetch_dataset_type(&self, name: &str) -> Result<Option<DatasetType>, RegistryError> {
        let rows = self
            .db
            .fetch(DATASET_TYPE, &row([("dataset_type_name", name.into())]))?;
        rows.first().map(|r| self.decode_dataset_type(r)).transpose()
    }

    fn decode_dataset_type(&self, stored: &Row) -> Result<DatasetType, RegistryError> {
        let name = text(stored, "dataset_type_name")?;
        let storage_class = text(stored, "storage_class")?;
        let names: Vec<String> = serde_json::from_str(text(stored, "dimensions")?)?;

        let dimensions = self.universe.extract(&names)?;
        let storage_class = self
            .storage_classes
            .get(storage_class)
            .map(StorageClassRef::from)
            .unwrap_or_else(|_| StorageClassRef::Name(storage_class.to_string()));
        Ok(DatasetType::new(name, dimensions, storage_class)?)
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Insert one dataset per data id into `run`.
    ///
    /// Each data id is expanded against the dimension records, so implied
    /// values are stored alongside the required ones. The whole call is one
    /// transactional unit: on any failure nothing is inserted.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownName`] if the dataset type is not registered
    /// - [`RegistryError::ConflictingDefinition`] if the registered type
    ///   differs, or a dataset with the same type and data id is already in
    ///   the run
    /// - Lookup errors if the run or a dimension record does not exist
    pub fn insert_datasets(
        &self,
        dataset_type: &DatasetType,
        data_ids: &[RawDataId],
        run: &str,
    ) -> Result<Vec<DatasetRef>, RegistryError> {
        self.scope(|| {
            let stored = self.get_dataset_type(dataset_type.name())?;
            if &stored != dataset_type {
                return Err(RegistryError::ConflictingDefinition(format!(
                    "dataset type {} does not match registered {}",
                    dataset_type, stored
                )));
            }
            let run = self
                .get_run(run)?
                .ok_or_else(|| RegistryError::Lookup(format!("run '{}' is not registered", run)))?;

            let mut refs = Vec::with_capacity(data_ids.len());
            for raw in data_ids {
                let data_id = self.expand_data_id(raw, dataset_type.dimensions())?;
                let unresolved = DatasetRef::new(dataset_type.clone(), &data_id)?;
                let hash = unresolved.content_hash();
                if self.find_membership(&run.name, &hash)?.is_some() {
                    return Err(RegistryError::ConflictingDefinition(format!(
                        "{} already exists in run '{}'",
                        unresolved, run.name
                    )));
                }

                let mut values = row([
                    ("origin", self.db.origin().into()),
                    ("dataset_type_name", dataset_type.name().into()),
                    ("run_id", run.id.into()),
                    ("dataset_ref_hash", hash.as_bytes().to_vec().into()),
                ]);
                for name in data_id.graph().names() {
                    if let Some(value) = data_id.get(name) {
                        values.insert(name.clone(), value.clone().into());
                    }
                }
                let id = insert_one(self, DATASET, values)?;
                self.db.insert(
                    DATASET_COLLECTION,
                    &[row([
                        ("dataset_id", id.into()),
                        ("dataset_ref_hash", hash.as_bytes().to_vec().into()),
                        ("collection", run.name.as_str().into()),
                    ])],
                )?;
                refs.push(unresolved.resolved(DatasetId::new(id), run.name.clone(), None));
            }

            tracing::debug!(
                dataset_type = dataset_type.name(),
                run = %run.name,
                count = refs.len(),
                "inserted datasets"
            );
            Ok(refs)
        })
    }

    /// Retrieve a dataset by id.
    ///
    /// The returned ref is resolved, its data id expanded, and its components
    /// loaded. Returns `None` if no dataset has this id.
    pub fn get_dataset(&self, id: DatasetId) -> Result<Option<DatasetRef>, RegistryError> {
        let rows = self
            .db
            .fetch(DATASET, &row([("dataset_id", id.get().into())]))?;
        let Some(stored) = rows.into_iter().next() else {
            return Ok(None);
        };

        let dataset_type = self.get_dataset_type(text(&stored, "dataset_type_name")?)?;
        let raw: RawDataId = dataset_type
            .dimensions()
            .names()
            .iter()
            .filter_map(|name| {
                stored
                    .get(name)
                    .and_then(FieldValue::to_data_value)
                    .map(|v| (name.clone(), v))
            })
            .collect();
        let data_id = self.expand_data_id(&raw, dataset_type.dimensions())?;

        let run_id = integer(&stored, "run_id")?;
        let run = self.get_run_by_id(run_id)?.ok_or_else(|| {
            RegistryError::Serialization(format!("dataset {} refers to missing run {}", id, run_id))
        })?;

        let mut components = BTreeMap::new();
        for link in self
            .db
            .fetch(DATASET_COMPOSITION, &row([("parent_dataset_id", id.get().into())]))?
        {
            let child = DatasetId::new(integer(&link, "component_dataset_id")?);
            if let Some(component) = self.get_dataset(child)? {
                components.insert(text(&link, "component_name")?.to_string(), component);
            }
        }

        let mut dataset = DatasetRef::new(dataset_type, &data_id)?;
        if let Some(hash) = stored.get("dataset_ref_hash").and_then(|v| match v {
            FieldValue::Bytes(b) => ContentHash::from_slice(b),
            _ => None,
        }) {
            dataset = dataset.with_content_hash(hash);
        }
        Ok(Some(dataset.resolved(id, run.name, Some(components))))
    }

    /// Find the dataset of a type with a data id in a collection.
    ///
    /// Returns `None` if the collection holds no such dataset (or does not
    /// exist).
    ///
    /// # Errors
    ///
    /// Returns a lookup-class error if `data_id` lacks a required value of
    /// the dataset type's dimensions.
    pub fn find(
        &self,
        collection: &str,
        dataset_type: &DatasetType,
        data_id: &RawDataId,
    ) -> Result<Option<DatasetRef>, RegistryError> {
        let data_id = DataCoordinate::standardize(data_id, dataset_type.dimensions())?;
        let wanted = DatasetRef::new(dataset_type.clone(), &data_id)?;
        match self.find_membership(collection, &wanted.content_hash())? {
            Some(id) => self.get_dataset(id),
            None => Ok(None),
        }
    }

    pub(super) fn find_membership(
        &self,
        collection: &str,
        hash: &ContentHash,
    ) -> Result<Option<DatasetId>, RegistryError> {
        let rows = self.db.fetch(
            DATASET_COLLECTION,
            &row([
                ("dataset_ref_hash", hash.as_bytes().to_vec().into()),
                ("collection", collection.into()),
            ]),
        )?;
        rows.first()
            .map(|r| integer(r, "dataset_id").map(DatasetId::new))
            .transpose()
    }

    /// Record `child` as component `name` of `parent`.
    ///
    /// Returns a copy of `parent` with the component attached.
    ///
    /// # Errors
    ///
    /// - Either ref is unresolved
    /// - The parent's storage class has no such component, or `child` has
    ///   the wrong storage class
    pub fn attach_component(
        &self,
        name: &str,
        parent: &DatasetRef,
        child: &DatasetRef,
    ) -> Result<DatasetRef, RegistryError> {
        let updated = parent.with_component(name, child.clone(), &self.storage_classes)?;
        let (Some(parent_id), Some(child_id)) = (parent.id(), child.id()) else {
            return Err(DatasetError::Unresolved(parent.dataset_type().name().to_string()).into());
        };
        self.scope(|| {
            self.db.insert(
                DATASET_COMPOSITION,
                &[row([
                    ("parent_dataset_id", parent_id.get().into()),
                    ("component_dataset_id", child_id.get().into()),
                    ("component_name", name.into()),
                ])],
            )?;
            Ok(())
        })?;
        tracing::debug!(parent = %parent_id, child = %child_id, component = name, "attached component");
        Ok(updated)
    }

    /// Remove a dataset and, recursively, its components.
    ///
    /// Collection memberships and composition links go with them.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::OrphanedRecord`] if a datastore still holds
    /// the dataset or one of its components.
    pub fn remove_dataset(&self, dataset: &DatasetRef) -> Result<(), RegistryError> {
        let id = resolved_id(dataset)?;
        self.scope(|| {
            let ids = self.component_closure(id)?;
            for id in &ids {
                let locations = self.locations_of(*id)?;
                if !locations.is_empty() {
                    return Err(RegistryError::OrphanedRecord(format!(
                        "dataset {} is still stored in: {}",
                        id,
                        locations.into_iter().collect::<Vec<_>>().join(", ")
                    )));
                }
            }
            let rows: Vec<Row> = ids
                .iter()
                .map(|id| row([("dataset_id", id.get().into())]))
                .collect();
            self.db.delete(DATASET, &rows)?;
            tracing::debug!(dataset = %id, removed = ids.len(), "removed dataset");
            Ok(())
        })
    }

    /// The dataset and every dataset reachable through composition links.
    fn component_closure(&self, id: DatasetId) -> Result<Vec<DatasetId>, RegistryError> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![id];
        let mut ordered = Vec::new();
        while let Some(next) = pending.pop() {
            if !seen.insert(next) {
                continue;
            }
            ordered.push(next);
            for link in self
                .db
                .fetch(DATASET_COMPOSITION, &row([("parent_dataset_id", next.get().into())]))?
            {
                pending.push(DatasetId::new(integer(&link, "component_dataset_id")?));
            }
        }
        Ok(ordered)
    }

    // =========================================================================
    // Datastore locations
    // =========================================================================

    /// Record that `datastore` holds each of `refs`.
    pub fn insert_dataset_locations(
        &self,
        datastore: &str,
        refs: &[DatasetRef],
    ) -> Result<(), RegistryError> {
        let rows = refs
            .iter()
            .map(|r| {
                Ok(row([
                    ("datastore_name", datastore.into()),
                    ("dataset_id", resolved_id(r)?.get().into()),
                ]))
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;
        self.scope(|| {
            self.db.replace(DATASET_LOCATION, &rows)?;
            Ok(())
        })
    }

    /// Names of the datastores holding a dataset.
    pub fn get_dataset_locations(
        &self,
        dataset: &DatasetRef,
    ) -> Result<BTreeSet<String>, RegistryError> {
        self.locations_of(resolved_id(dataset)?)
    }

    /// Forget that `datastore` holds a dataset.
    pub fn remove_dataset_location(
        &self,
        datastore: &str,
        dataset: &DatasetRef,
    ) -> Result<(), RegistryError> {
        let id = resolved_id(dataset)?;
        self.scope(|| {
            self.db.delete(
                DATASET_LOCATION,
                &[row([
                    ("datastore_name", datastore.into()),
                    ("dataset_id", id.get().into()),
                ])],
            )?;
            Ok(())
        })
    }

    fn locations_of(&self, id: DatasetId) -> Result<BTreeSet<String>, RegistryError> {
        self.db
            .fetch(DATASET_LOCATION, &row([("dataset_id", id.get().into())]))?
            .iter()
            .map(|r| text(r, "datastore_name").map(str::to_string))
            .collect()
    }
}

pub(super) fn resolved_id(dataset: &DatasetRef) -> Result<DatasetId, RegistryError> {
    dataset
        .id()
        .ok_or_else(|| DatasetError::Unresolved(dataset.dataset_type().name().to_string()).into())
}

pub(super) fn insert_one(registry: &Registry, table: &str, values: Row) -> Result<i64, RegistryError> {
    registry
        .db
        .insert(table, &[values])?
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::Serialization(format!("no row id returned for '{}'", table)))
}

pub(super) fn text<'r>(stored: &'r Row, column: &str) -> Result<&'r str, RegistryError> {
    stored
        .get(column)
        .and_then(FieldValue::as_str)
        .ok_or_else(|| RegistryError::Serialization(format!("column '{}' is not text", column)))
}

pub(super) fn integer(stored: &Row, column: &str) -> Result<i64, RegistryError> {
    stored
        .get(column)
        .and_then(FieldValue::as_int)
        .ok_or_else(|| RegistryError::Serialization(format!("column '{}' is not an integer", column)))
}
