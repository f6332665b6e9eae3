//! registry::opaque
//!
//! Tables whose contents the catalog does not interpret.
//!
//! Datastores keep their own bookkeeping (file paths, checksums) here so it
//! shares the catalog's transactions.

use super::tables::RESERVED;
use super::{Registry, RegistryError};
use crate::db::{Row, TableSpec};

impl Registry {
    /// Declare an opaque table, creating it if needed.
    ///
    /// Registering the same definition twice is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConflictingDefinition`] if `name` belongs to a
    /// catalog or dimension table, or was registered with another definition.
    pub fn register_opaque_table(&self, name: &str, spec: TableSpec) -> Result<(), RegistryError> {
        let spec = TableSpec {
            name: name.to_string(),
            ..spec
        };
        let internal = RESERVED.contains(&name)
            || self
                .universe
                .elements()
                .any(|e| e.name == name || super::tables::overlap_table(&e.name) == name);
        if internal {
            return Err(RegistryError::ConflictingDefinition(format!(
                "'{}' is a catalog table",
                name
            )));
        }
        if let Some(existing) = self.db.table_spec(name) {
            if existing != spec {
                return Err(RegistryError::ConflictingDefinition(format!(
                    "opaque table '{}' is already registered with another definition",
                    name
                )));
            }
        }

        self.db.declare_tables(&[spec], self.create)?;
        self.opaque.borrow_mut().insert(name.to_string());
        tracing::debug!(table = name, "registered opaque table");
        Ok(())
    }

    /// Insert rows into an opaque table.
    pub fn insert_opaque_data(&self, table: &str, rows: &[Row]) -> Result<(), RegistryError> {
        self.check_opaque(table)?;
        self.scope(|| {
            self.db.insert(table, rows)?;
            Ok(())
        })
    }

    /// Fetch rows matching every column of `filter` (all rows if empty).
    pub fn fetch_opaque_data(&self, table: &str, filter: &Row) -> Result<Vec<Row>, RegistryError> {
        self.check_opaque(table)?;
        Ok(self.db.fetch(table, filter)?)
    }

    /// Delete rows matching every column of `filter` (all rows if empty).
    ///
    /// Returns the number of rows deleted.
    pub fn delete_opaque_data(&self, table: &str, filter: &Row) -> Result<usize, RegistryError> {
        self.check_opaque(table)?;
        self.scope(|| Ok(self.db.delete(table, &[filter.clone()])?))
    }

    fn check_opaque(&self, table: &str) -> Result<(), RegistryError> {
        if self.opaque.borrow().contains(table) {
            Ok(())
        } else {
            Err(RegistryError::UnknownName(format!("opaque table '{}'", table)))
        }
    }
}
