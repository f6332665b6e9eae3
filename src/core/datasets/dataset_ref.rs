//! core::datasets::dataset_ref
//!
//! References to individual datasets.
//!
//! # Resolution
//!
//! A ref is built **unresolved** from a dataset type and data id. The
//! registry resolves it by assigning an id and a run. Resolved refs may carry
//! named component refs, themselves resolved.
//!
//! # Identity
//!
//! - `==` compares (dataset type, data id, id), so two unresolved refs for the
//!   same dataset are equal and a resolved ref differs from its unresolved copy
//! - `Hash` uses only the dataset type name and data id, so resolving or
//!   stripping a ref never changes its hash
//! - [`DatasetRef::content_hash`] is a BLAKE2b-256 digest over the type name
//!   and the data id fingerprint, computed once and carried along by copies

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use super::{DatasetError, DatasetType};
use crate::core::dimensions::{DataCoordinate, RawDataId};
use crate::core::storage_class::StorageClassRegistry;
use crate::core::types::{ContentHash, DatasetId};

type Blake2b256 = Blake2b<U32>;

/// A reference to one dataset.
#[derive(Clone)]
pub struct DatasetRef {
    dataset_type: DatasetType,
    data_id: DataCoordinate,
    id: Option<DatasetId>,
    run: Option<String>,
    components: Option<BTreeMap<String, DatasetRef>>,
    hash: OnceLock<ContentHash>,
}

impl DatasetRef {
    /// Create an unresolved ref.
    ///
    /// The data id is conformed to the dataset type's dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Dimension`] if the data id cannot be conformed.
    pub fn new(dataset_type: DatasetType, data_id: &DataCoordinate) -> Result<Self, DatasetError> {
        let data_id = data_id.subset(dataset_type.dimensions())?;
        Ok(Self::from_parts(dataset_type, data_id))
    }

    /// Create an unresolved ref from a raw data id.
    pub fn from_raw(dataset_type: DatasetType, data_id: &RawDataId) -> Result<Self, DatasetError> {
        let data_id = DataCoordinate::standardize(data_id, dataset_type.dimensions())?;
        Ok(Self::from_parts(dataset_type, data_id))
    }

    fn from_parts(dataset_type: DatasetType, data_id: DataCoordinate) -> Self {
        Self {
            dataset_type,
            data_id,
            id: None,
            run: None,
            components: None,
            hash: OnceLock::new(),
        }
    }

    /// Supply a precomputed content hash.
    pub fn with_content_hash(self, hash: ContentHash) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(hash);
        Self { hash: cell, ..self }
    }

    /// A resolved copy with the given id and run.
    ///
    /// Components already attached are kept; `components` overrides them on
    /// name collisions.
    pub fn resolved(
        &self,
        id: DatasetId,
        run: impl Into<String>,
        components: Option<BTreeMap<String, DatasetRef>>,
    ) -> Self {
        let mut merged = self.components.clone().unwrap_or_default();
        merged.extend(components.unwrap_or_default());
        Self {
            dataset_type: self.dataset_type.clone(),
            data_id: self.data_id.clone(),
            id: Some(id),
            run: Some(run.into()),
            components: Some(merged),
            hash: self.hash.clone(),
        }
    }

    /// An unresolved copy: no id, run, or components.
    pub fn unresolved(&self) -> Self {
        Self {
            dataset_type: self.dataset_type.clone(),
            data_id: self.data_id.clone(),
            id: None,
            run: None,
            components: None,
            hash: self.hash.clone(),
        }
    }

    /// An unresolved copy for transfer to another registry.
    pub fn detach(&self) -> Self {
        self.unresolved()
    }

    /// A copy with one more component attached.
    ///
    /// # Errors
    ///
    /// - [`DatasetError::Unresolved`] if this ref or `child` is unresolved
    /// - [`DatasetError::UnknownComponent`] if the storage class has no such component
    /// - [`DatasetError::ComponentMismatch`] if `child` has the wrong storage class
    pub fn with_component(
        &self,
        name: &str,
        child: DatasetRef,
        registry: &StorageClassRegistry,
    ) -> Result<Self, DatasetError> {
        let id = self
            .id
            .ok_or_else(|| DatasetError::Unresolved(self.dataset_type.name().to_string()))?;
        if !child.is_resolved() {
            return Err(DatasetError::Unresolved(child.dataset_type.name().to_string()));
        }
        self.check_component(name, &child, registry)?;

        let mut components = BTreeMap::new();
        components.insert(name.to_string(), child);
        let run = self.run.clone().unwrap_or_default();
        Ok(self.resolved(id, run, Some(components)))
    }

    /// Check that `child` may be attached as component `name`.
    pub fn check_component(
        &self,
        name: &str,
        child: &DatasetRef,
        registry: &StorageClassRegistry,
    ) -> Result<(), DatasetError> {
        let parent = self.dataset_type.resolve_storage_class(registry)?;
        let expected = parent
            .component(name)
            .ok_or_else(|| DatasetError::UnknownComponent {
                component: name.to_string(),
                storage_class: parent.name().to_string(),
            })?;
        let actual = child.dataset_type.storage_class_name();
        if expected != actual {
            return Err(DatasetError::ComponentMismatch {
                component: name.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    pub fn dataset_type(&self) -> &DatasetType {
        &self.dataset_type
    }

    pub fn data_id(&self) -> &DataCoordinate {
        &self.data_id
    }

    pub fn id(&self) -> Option<DatasetId> {
        self.id
    }

    pub fn run(&self) -> Option<&str> {
        self.run.as_deref()
    }

    /// Attached components; `None` for unresolved refs.
    pub fn components(&self) -> Option<&BTreeMap<String, DatasetRef>> {
        self.components.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_component(&self) -> bool {
        self.dataset_type.is_component()
    }

    pub fn is_composite(&self, registry: &StorageClassRegistry) -> Result<bool, DatasetError> {
        self.dataset_type.is_composite(registry)
    }

    /// The BLAKE2b-256 digest of the type name and data id fingerprint.
    pub fn content_hash(&self) -> ContentHash {
        *self.hash.get_or_init(|| {
            let mut hasher = Blake2b256::new();
            hasher.update(self.dataset_type.name().as_bytes());
            hasher.update(self.data_id.fingerprint());
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&hasher.finalize());
            ContentHash::from_bytes(bytes)
        })
    }
}

impl PartialEq for DatasetRef {
    fn eq(&self, other: &Self) -> bool {
        self.dataset_type == other.dataset_type
            && self.data_id == other.data_id
            && self.id == other.id
    }
}

impl Eq for DatasetRef {}

impl Hash for DatasetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dataset_type.name().hash(state);
        self.data_id.hash(state);
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset_type.name(), self.data_id)?;
        if let (Some(id), Some(run)) = (self.id, &self.run) {
            write!(f, " [id={}, run={}]", id, run)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRef")
            .field("dataset_type", &self.dataset_type.name())
            .field("data_id", &self.data_id)
            .field("id", &self.id)
            .field("run", &self.run)
            .field(
                "components",
                &self.components.as_ref().map(|c| c.keys().collect::<Vec<_>>()),
            )
            .finish()
    }
}
