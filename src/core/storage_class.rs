//! core::storage_class
//!
//! Storage class definitions and their registry.
//!
//! A storage class names the in-memory type a dataset is read into. A
//! composite class declares named components, each with its own storage
//! class. Definitions are held in an explicitly constructed
//! [`StorageClassRegistry`] owned by the application and passed to whatever
//! needs to resolve names.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

/// Errors from storage class lookups and registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageClassError {
    #[error("unknown storage class: {0}")]
    Unknown(String),

    #[error("storage class '{0}' is already registered with a different definition")]
    Conflict(String),
}

/// A named in-memory type, optionally with named components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClass {
    name: String,
    /// Component name -> storage class name.
    components: BTreeMap<String, String>,
}

impl StorageClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: BTreeMap::new(),
        }
    }

    /// Declare a component.
    pub fn with_component(mut self, component: impl Into<String>, storage_class: impl Into<String>) -> Self {
        self.components.insert(component.into(), storage_class.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &BTreeMap<String, String> {
        &self.components
    }

    /// Storage class name declared for a component.
    pub fn component(&self, component: &str) -> Option<&str> {
        self.components.get(component).map(String::as_str)
    }

    pub fn is_composite(&self) -> bool {
        !self.components.is_empty()
    }
}

/// Registry of storage class definitions.
#[derive(Debug, Clone, Default)]
pub struct StorageClassRegistry {
    classes: HashMap<String, Arc<StorageClass>>,
}

impl StorageClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.
    ///
    /// Registering an identical definition again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageClassError::Conflict`] if a different definition with
    /// the same name exists.
    pub fn register(&mut self, storage_class: StorageClass) -> Result<Arc<StorageClass>, StorageClassError> {
        if let Some(existing) = self.classes.get(storage_class.name()) {
            if **existing != storage_class {
                return Err(StorageClassError::Conflict(storage_class.name.clone()));
            }
            return Ok(existing.clone());
        }
        let storage_class = Arc::new(storage_class);
        self.classes
            .insert(storage_class.name.clone(), storage_class.clone());
        Ok(storage_class)
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Result<Arc<StorageClass>, StorageClassError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| StorageClassError::Unknown(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }
}

/// A storage class held by value or by name.
///
/// Names are resolved lazily against a [`StorageClassRegistry`]. Equality
/// compares names only.
#[derive(Debug, Clone)]
pub enum StorageClassRef {
    Instance(Arc<StorageClass>),
    Name(String),
}

impl StorageClassRef {
    pub fn name(&self) -> &str {
        match self {
            StorageClassRef::Instance(sc) => sc.name(),
            StorageClassRef::Name(name) => name,
        }
    }

    /// Get the definition, looking it up by name if necessary.
    pub fn resolve(&self, registry: &StorageClassRegistry) -> Result<Arc<StorageClass>, StorageClassError> {
        match self {
            StorageClassRef::Instance(sc) => Ok(sc.clone()),
            StorageClassRef::Name(name) => registry.get(name),
        }
    }
}

impl PartialEq for StorageClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for StorageClassRef {}

impl From<StorageClass> for StorageClassRef {
    fn from(sc: StorageClass) -> Self {
        StorageClassRef::Instance(Arc::new(sc))
    }
}

impl From<Arc<StorageClass>> for StorageClassRef {
    fn from(sc: Arc<StorageClass>) -> Self {
        StorageClassRef::Instance(sc)
    }
}

impl From<&str> for StorageClassRef {
    fn from(name: &str) -> Self {
        StorageClassRef::Name(name.to_string())
    }
}

impl From<String> for StorageClassRef {
    fn from(name: String) -> Self {
        StorageClassRef::Name(name)
    }
}
