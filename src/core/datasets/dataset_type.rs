//! core::datasets::dataset_type

use std::fmt;
use std::hash::{Hash, Hasher};

use super::DatasetError;
use crate::core::dimensions::DimensionGraph;
use crate::core::storage_class::{StorageClass, StorageClassRef, StorageClassRegistry};
use crate::core::types::validate_dataset_type_name;

/// A named class of dataset: its dimensions and storage class.
///
/// Equality and hashing use the name, the dimension graph, and the storage
/// class *name*; a storage class held by value equals one held by name.
///
/// Names of the form `parent.component` denote component dataset types.
#[derive(Debug, Clone)]
pub struct DatasetType {
    name: String,
    dimensions: DimensionGraph,
    storage_class: StorageClassRef,
}

impl DatasetType {
    /// Create a dataset type.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidName`] if the name is malformed.
    pub fn new(
        name: impl Into<String>,
        dimensions: DimensionGraph,
        storage_class: impl Into<StorageClassRef>,
    ) -> Result<Self, DatasetError> {
        let name = name.into();
        validate_dataset_type_name(&name)?;
        Ok(Self {
            name,
            dimensions,
            storage_class: storage_class.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &DimensionGraph {
        &self.dimensions
    }

    pub fn storage_class(&self) -> &StorageClassRef {
        &self.storage_class
    }

    pub fn storage_class_name(&self) -> &str {
        self.storage_class.name()
    }

    /// Split `parent.component` into its parts.
    pub fn name_and_component(&self) -> (&str, Option<&str>) {
        match self.name.split_once('.') {
            Some((parent, component)) => (parent, Some(component)),
            None => (&self.name, None),
        }
    }

    pub fn is_component(&self) -> bool {
        self.name_and_component().1.is_some()
    }

    /// Check whether the storage class declares components.
    pub fn is_composite(&self, registry: &StorageClassRegistry) -> Result<bool, DatasetError> {
        Ok(self.storage_class.resolve(registry)?.is_composite())
    }

    /// Name of a component dataset type of this type.
    pub fn component_type_name(&self, component: &str) -> String {
        format!("{}.{}", self.name, component)
    }

    /// The dataset type of one of this type's components.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::UnknownComponent`] if the storage class does
    /// not declare `component`.
    pub fn component_type(
        &self,
        component: &str,
        registry: &StorageClassRegistry,
    ) -> Result<DatasetType, DatasetError> {
        let parent = self.storage_class.resolve(registry)?;
        let child = parent
            .component(component)
            .ok_or_else(|| DatasetError::UnknownComponent {
                component: component.to_string(),
                storage_class: parent.name().to_string(),
            })?;
        let child = registry
            .get(child)
            .map(StorageClassRef::from)
            .unwrap_or_else(|_| StorageClassRef::Name(child.to_string()));
        DatasetType::new(
            self.component_type_name(component),
            self.dimensions.clone(),
            child,
        )
    }

    /// Resolve the storage class definition.
    pub fn resolve_storage_class(
        &self,
        registry: &StorageClassRegistry,
    ) -> Result<std::sync::Arc<StorageClass>, DatasetError> {
        Ok(self.storage_class.resolve(registry)?)
    }
}

impl PartialEq for DatasetType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.dimensions == other.dimensions
            && self.storage_class == other.storage_class
    }
}

impl Eq for DatasetType {}

impl Hash for DatasetType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.dimensions.hash(state);
        self.storage_class.name().hash(state);
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DatasetType({}, {}, {})",
            self.name,
            self.dimensions,
            self.storage_class.name()
        )
    }
}
