//! registry
//!
//! The dataset catalog.
//!
//! # Architecture
//!
//! A [`Registry`] owns one [`Database`] connection, the dimension universe
//! its tables were built from, and the storage classes used to validate
//! composites. Operations are grouped by concern:
//!
//! - `datasets`: dataset types, dataset insertion, lookup, components, removal,
//!   datastore locations
//! - `collections`: runs and tagged collections
//! - `dimensions`: dimension records and data id expansion
//! - `opaque`: datastore-private tables
//! - `queries`: dimension and dataset queries
//!
//! # Transactions
//!
//! Every mutating operation runs inside a transaction scope. When no
//! transaction is active the operation opens its own; inside
//! [`Registry::transaction`] it opens a savepoint, so a failed operation
//! unwinds only its own writes and the caller decides the fate of the rest.
//! [`Registry::caller_managed`] suspends the implicit scopes for callers that
//! drive transactions themselves.
//!
//! # Example
//!
//! ```
//! use dimcat::core::config::RegistryConfig;
//! use dimcat::core::datasets::DatasetType;
//! use dimcat::core::storage_class::{StorageClass, StorageClassRegistry};
//! use dimcat::registry::Registry;
//! use dimcat::{data_id, record};
//!
//! let mut storage_classes = StorageClassRegistry::new();
//! storage_classes.register(StorageClass::new("Exposure")).unwrap();
//! let registry = Registry::open(&RegistryConfig::default(), storage_classes).unwrap();
//!
//! let raw = DatasetType::new(
//!     "raw",
//!     registry.universe().extract(["instrument"]).unwrap(),
//!     "Exposure",
//! )
//! .unwrap();
//! assert!(registry.register_dataset_type(&raw).unwrap());
//!
//! registry
//!     .insert_dimension_data("instrument", &[record! {"name" => "DummyCam"}])
//!     .unwrap();
//! registry.register_run("ingest").unwrap();
//!
//! let refs = registry
//!     .insert_datasets(&raw, &[data_id! {"instrument" => "DummyCam"}], "ingest")
//!     .unwrap();
//! let found = registry
//!     .find("ingest", &raw, &data_id! {"instrument" => "DummyCam"})
//!     .unwrap();
//! assert_eq!(found.as_ref(), Some(&refs[0]));
//! ```

mod collections;
mod datasets;
mod dimensions;
mod error;
mod opaque;
mod queries;
pub mod tables;

pub use error::RegistryError;
pub use queries::QueryRows;

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use crate::core::config::RegistryConfig;
use crate::core::dimensions::DimensionUniverse;
use crate::core::storage_class::StorageClassRegistry;
use crate::db::{self, Database, DbError, Transaction};

/// A catalog of datasets, their dimensions, and collections.
///
/// Not `Sync`: one registry wraps one connection used from one thread.
pub struct Registry {
    db: Box<dyn Database>,
    universe: DimensionUniverse,
    storage_classes: StorageClassRegistry,
    create: bool,
    page_size: usize,
    opaque: RefCell<BTreeSet<String>>,
    caller_managed: Cell<bool>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.db.backend())
            .field("origin", &self.db.origin())
            .field("writeable", &self.db.is_writeable())
            .finish()
    }
}

impl Registry {
    /// Open the registry described by `config`.
    ///
    /// The dimension universe comes from the configuration (the built-in
    /// observational universe by default). Missing tables are created when
    /// the configuration allows it and the connection is writeable.
    ///
    /// # Errors
    ///
    /// - Invalid configuration or universe definition
    /// - The database cannot be opened or lacks catalog tables
    pub fn open(
        config: &RegistryConfig,
        storage_classes: StorageClassRegistry,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let universe = DimensionUniverse::new(config.universe()?)?;
        let db = db::connect(&config.db)?;
        let create = config.create() && db.is_writeable();
        Self::from_database(db, universe, storage_classes, create, config.query_page_size())
    }

    /// Build a registry over an open connection.
    pub fn from_database(
        db: Box<dyn Database>,
        universe: DimensionUniverse,
        storage_classes: StorageClassRegistry,
        create: bool,
        page_size: usize,
    ) -> Result<Self, RegistryError> {
        if let Some(element) = universe
            .elements()
            .find(|e| tables::RESERVED.contains(&e.name.as_str()))
        {
            return Err(RegistryError::ConflictingDefinition(format!(
                "dimension element '{}' collides with a catalog table",
                element.name
            )));
        }

        db.declare_tables(&tables::catalog_tables(&universe), create)?;
        tracing::debug!(
            backend = db.backend().name(),
            origin = db.origin(),
            writeable = db.is_writeable(),
            "opened registry"
        );

        Ok(Self {
            db,
            universe,
            storage_classes,
            create,
            page_size: page_size.max(1),
            opaque: RefCell::new(BTreeSet::new()),
            caller_managed: Cell::new(false),
        })
    }

    pub fn universe(&self) -> &DimensionUniverse {
        &self.universe
    }

    pub fn storage_classes(&self) -> &StorageClassRegistry {
        &self.storage_classes
    }

    pub fn storage_classes_mut(&mut self) -> &mut StorageClassRegistry {
        &mut self.storage_classes
    }

    /// The underlying connection.
    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn is_writeable(&self) -> bool {
        self.db.is_writeable()
    }

    /// Run `f` in a transaction scope.
    ///
    /// Commits when `f` succeeds. When it fails, everything written inside
    /// the scope is rolled back and the error is returned unchanged; an
    /// enclosing scope keeps its own earlier work.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RegistryError>,
    {
        let tx = Transaction::begin(self.db.as_ref(), false)
            .map_err(|e| E::from(RegistryError::from(e)))?;
        match f(self) {
            Ok(value) => {
                tx.commit().map_err(|e| E::from(RegistryError::from(e)))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Run `f` with implicit transaction scopes suspended.
    ///
    /// The caller must already hold a transaction on [`Registry::database`];
    /// mutating operations inside `f` fail with [`DbError::NoTransaction`]
    /// otherwise.
    pub fn caller_managed<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self) -> T,
    {
        let _guard = CallerManaged {
            previous: self.caller_managed.replace(true),
            flag: &self.caller_managed,
        };
        f(self)
    }

    /// Run one mutating operation in its own scope.
    fn scope<T>(&self, f: impl FnOnce() -> Result<T, RegistryError>) -> Result<T, RegistryError> {
        if self.caller_managed.get() {
            if !self.db.in_transaction() {
                return Err(DbError::NoTransaction.into());
            }
            return f();
        }
        db::transaction(self.db.as_ref(), false, f)
    }
}

/// Restores the caller-managed flag on drop, including during unwinding.
struct CallerManaged<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl Drop for CallerManaged<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}
