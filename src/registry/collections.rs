//! registry::collections
//!
//! Runs and tagged collections.
//!
//! Every run is also a collection of the same name; datasets join their
//! run's collection when inserted. Other collections are created on first
//! [`Registry::associate`].

use std::collections::BTreeSet;

use super::datasets::{insert_one, integer, resolved_id, text};
use super::tables::{COLLECTION, DATASET_COLLECTION, RUN};
use super::{Registry, RegistryError};
use crate::core::datasets::DatasetRef;
use crate::core::run::Run;
use crate::core::types::validate_collection_name;
use crate::db::{row, Row};

impl Registry {
    /// Register a run by name, or return the existing one.
    pub fn register_run(&self, name: &str) -> Result<Run, RegistryError> {
        self.register_run_with(Run::new(name)?)
    }

    /// Register a run with provenance, or return the existing one.
    ///
    /// The `id` and `origin` of `run` are ignored; the catalog assigns them.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConflictingDefinition`] if a run with the same
    /// name exists with different provenance.
    pub fn register_run_with(&self, run: Run) -> Result<Run, RegistryError> {
        validate_collection_name(&run.name)?;
        self.scope(|| {
            if let Some(existing) = self.get_run(&run.name)? {
                let same = existing.environment == run.environment
                    && existing.pipeline == run.pipeline;
                let unspecified = run.environment.is_none() && run.pipeline.is_none();
                if same || unspecified {
                    return Ok(existing);
                }
                return Err(RegistryError::ConflictingDefinition(format!(
                    "run '{}' is already registered with different provenance",
                    run.name
                )));
            }

            self.db
                .replace(COLLECTION, &[row([("name", run.name.as_str().into())])])?;
            let origin = self.db.origin();
            let id = insert_one(
                self,
                RUN,
                row([
                    ("origin", origin.into()),
                    ("name", run.name.as_str().into()),
                    ("environment", run.environment.clone().into()),
                    ("pipeline", run.pipeline.clone().into()),
                ]),
            )?;
            tracing::debug!(run = %run.name, id, "registered run");
            Ok(Run { id, origin, ..run.clone() })
        })
    }

    /// Get a run by name.
    pub fn get_run(&self, name: &str) -> Result<Option<Run>, RegistryError> {
        let rows = self.db.fetch(RUN, &row([("name", name.into())]))?;
        rows.first().map(decode_run).transpose()
    }

    pub(super) fn get_run_by_id(&self, id: i64) -> Result<Option<Run>, RegistryError> {
        let rows = self.db.fetch(RUN, &row([("run_id", id.into())]))?;
        rows.first().map(decode_run).transpose()
    }

    /// Names of every collection, runs included.
    pub fn get_all_collections(&self) -> Result<BTreeSet<String>, RegistryError> {
        self.db
            .fetch(COLLECTION, &Row::new())?
            .iter()
            .map(|r| text(r, "name").map(str::to_string))
            .collect()
    }

    /// Add datasets (and their components) to a collection.
    ///
    /// Re-associating a dataset already in the collection does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConflictingDefinition`] if the collection
    /// already holds a different dataset with the same type and data id; no
    /// dataset of the call is associated in that case.
    pub fn associate(&self, collection: &str, refs: &[DatasetRef]) -> Result<(), RegistryError> {
        validate_collection_name(collection)?;
        let refs = with_components(refs);
        self.scope(|| {
            self.db
                .replace(COLLECTION, &[row([("name", collection.into())])])?;
            let mut added = 0;
            for dataset in &refs {
                let id = resolved_id(dataset)?;
                let hash = dataset.content_hash();
                match self.find_membership(collection, &hash)? {
                    Some(existing) if existing == id => continue,
                    Some(existing) => {
                        return Err(RegistryError::ConflictingDefinition(format!(
                            "collection '{}' already holds dataset {} for {}",
                            collection, existing, dataset
                        )))
                    }
                    None => {}
                }
                self.db.insert(
                    DATASET_COLLECTION,
                    &[row([
                        ("dataset_id", id.get().into()),
                        ("dataset_ref_hash", hash.as_bytes().to_vec().into()),
                        ("collection", collection.into()),
                    ])],
                )?;
                added += 1;
            }
            tracing::debug!(collection, added, "associated datasets");
            Ok(())
        })
    }

    /// Remove datasets (and their components) from a collection.
    ///
    /// Datasets not in the collection are ignored.
    pub fn disassociate(&self, collection: &str, refs: &[DatasetRef]) -> Result<(), RegistryError> {
        let rows = with_components(refs)
            .iter()
            .map(|r| {
                Ok(row([
                    ("dataset_id", resolved_id(r)?.get().into()),
                    ("collection", collection.into()),
                ]))
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;
        self.scope(|| {
            let removed = self.db.delete(DATASET_COLLECTION, &rows)?;
            tracing::debug!(collection, removed, "disassociated datasets");
            Ok(())
        })
    }
}

/// `refs` followed by all of their components, recursively.
fn with_components(refs: &[DatasetRef]) -> Vec<DatasetRef> {
    let mut all = Vec::new();
    let mut pending: Vec<DatasetRef> = refs.iter().rev().cloned().collect();
    while let Some(next) = pending.pop() {
        if let Some(components) = next.components() {
            pending.extend(components.values().cloned());
        }
        all.push(next);
    }
    all
}

fn decode_run(stored: &Row) -> Result<Run, RegistryError> {
    Ok(Run {
        id: integer(stored, "run_id")?,
        origin: integer(stored, "origin")?,
        name: text(stored, "name")?.to_string(),
        environment: stored
            .get("environment")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        pipeline: stored
            .get("pipeline")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}
