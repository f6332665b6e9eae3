//! db
//!
//! Database abstraction over SQL engines.
//!
//! # Architecture
//!
//! All catalog storage goes through the [`Database`] trait. There is one
//! implementation per engine, selected from a [`DatabaseDescriptor`] by
//! [`connect`]:
//!
//! - [`SqliteDatabase`]: file-backed or in-memory SQLite via `rusqlite`
//!
//! Callers work with logical table and column names. Implementations apply
//! the configured table prefix and shrink identifiers that exceed the
//! engine's length limit, so neither leaks into registry code.
//!
//! # Transactions
//!
//! [`Database::begin`] opens a transaction, or a savepoint when one is
//! already active. Use the [`Transaction`] guard or the [`transaction`]
//! helper rather than calling begin/commit/rollback directly: the guard
//! rolls back on drop, so an early return or `?` unwinds exactly to the
//! nearest enclosing scope.
//!
//! # Example
//!
//! ```
//! use dimcat::core::config::DatabaseDescriptor;
//! use dimcat::core::types::{FieldKind, FieldValue};
//! use dimcat::db::{self, FieldSpec, TableSpec};
//!
//! let database = db::connect(&DatabaseDescriptor::in_memory()).unwrap();
//! database.declare_tables(
//!     &[TableSpec::new("note")
//!         .field(FieldSpec::new("key", FieldKind::Str).primary_key())
//!         .field(FieldSpec::new("body", FieldKind::Str))],
//!     true,
//! )
//! .unwrap();
//!
//! database.replace("note", &[db::row([("key", "a".into()), ("body", "first".into())])])
//!     .unwrap();
//! database.replace("note", &[db::row([("key", "a".into()), ("body", "second".into())])])
//!     .unwrap();
//!
//! let rows = database.fetch("note", &db::Row::new()).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0]["body"], FieldValue::from("second"));
//! ```

mod shrink;
mod spec;
mod sqlite;
mod transaction;

pub use shrink::NameShrinker;
pub use spec::{FieldSpec, ForeignKeySpec, TableSpec};
pub use sqlite::SqliteDatabase;
pub use transaction::{transaction, Transaction};

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::config::{Backend, ConfigError, DatabaseDescriptor};
use crate::core::types::{FieldKind, FieldValue};

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A write was attempted through a read-only connection.
    #[error("database connection is read-only")]
    ReadOnly,

    /// Error reported by the engine (integrity violations included).
    #[error("database error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// An interrupting transaction was requested inside another one.
    #[error("cannot begin an interrupting transaction inside an active transaction")]
    NestedInterrupting,

    /// Commit or rollback without an active transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// The table was never declared on this connection.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Stored data or declared tables do not match expectations.
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid connection descriptor.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DbError {
    /// Check if this error is a uniqueness, foreign key, or not-null violation.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            DbError::Backend(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// One table row keyed by logical column name.
pub type Row = BTreeMap<String, FieldValue>;

/// Build a [`Row`] from column/value pairs.
pub fn row<const N: usize>(pairs: [(&str, FieldValue); N]) -> Row {
    pairs
        .into_iter()
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

/// A connection to one catalog database.
///
/// Implementations are synchronous and intended for a single thread; they
/// use interior mutability for transaction depth and name bookkeeping.
pub trait Database {
    /// The engine behind this connection.
    fn backend(&self) -> Backend;

    /// Origin tag stamped on records created through this connection.
    fn origin(&self) -> i64;

    /// Check if the connection accepts writes.
    fn is_writeable(&self) -> bool;

    /// Longest identifier emitted without shrinking.
    fn max_identifier_length(&self) -> usize;

    /// Open a transaction, or a savepoint inside the active one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NestedInterrupting`] if `interrupting` is set and a
    /// transaction is already active.
    fn begin(&self, interrupting: bool) -> Result<(), DbError>;

    /// Commit the innermost transaction scope.
    fn commit(&self) -> Result<(), DbError>;

    /// Roll back the innermost transaction scope.
    fn rollback(&self) -> Result<(), DbError>;

    /// Number of open transaction scopes.
    fn transaction_depth(&self) -> usize;

    /// Check if a transaction is active.
    fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Shorten an identifier that exceeds the engine limit.
    ///
    /// The mapping is stable and reversible through [`Database::expand_name`].
    fn shrink_name(&self, name: &str) -> String;

    /// Recover the original of a shrunk identifier.
    fn expand_name(&self, name: &str) -> String;

    /// Physical name of a logical table (prefix applied, then shrunk).
    fn table_name(&self, logical: &str) -> String;

    /// Register table definitions, creating missing tables when `create` is set.
    ///
    /// # Errors
    ///
    /// Without `create`, a declared table missing from the database is a
    /// [`DbError::Schema`] error.
    fn declare_tables(&self, specs: &[TableSpec], create: bool) -> Result<(), DbError>;

    /// Definition of a declared table.
    fn table_spec(&self, table: &str) -> Option<TableSpec>;

    /// Insert rows, returning the engine row id assigned to each.
    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<i64>, DbError>;

    /// Insert rows, replacing existing rows with the same primary key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnly`] on a non-writeable connection.
    fn replace(&self, table: &str, rows: &[Row]) -> Result<(), DbError>;

    /// Delete rows matching every column of each given row.
    ///
    /// Returns the number of rows deleted.
    fn delete(&self, table: &str, rows: &[Row]) -> Result<usize, DbError>;

    /// Fetch all rows matching every column of `filter`.
    fn fetch(&self, table: &str, filter: &Row) -> Result<Vec<Row>, DbError>;

    /// Run a read-only SQL query, decoding each output column as `kinds`.
    fn query(
        &self,
        sql: &str,
        params: &[FieldValue],
        kinds: &[FieldKind],
    ) -> Result<Vec<Vec<FieldValue>>, DbError>;

    /// Count the rows of a table.
    fn count_rows(&self, table: &str) -> Result<usize, DbError> {
        if self.table_spec(table).is_none() {
            return Err(DbError::UnknownTable(table.to_string()));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&self.table_name(table)));
        let rows = self.query(&sql, &[], &[FieldKind::Int])?;
        let count = rows
            .first()
            .and_then(|r| r.first())
            .and_then(FieldValue::as_int)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Quote an SQL identifier.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Open a connection described by `descriptor`.
///
/// # Backends
///
/// - `sqlite` (default): [`SqliteDatabase`], in memory for `:memory:`
///
/// # Errors
///
/// - Invalid descriptor
/// - The engine cannot open the target
pub fn connect(descriptor: &DatabaseDescriptor) -> Result<Box<dyn Database>, DbError> {
    descriptor.validate()?;
    match descriptor.backend {
        Backend::Sqlite => Ok(Box::new(SqliteDatabase::open(descriptor)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_in_memory() {
        let db = connect(&DatabaseDescriptor::in_memory().with_origin(2)).expect("connect");
        assert_eq!(db.backend(), Backend::Sqlite);
        assert_eq!(db.origin(), 2);
        assert!(db.is_writeable());
        assert!(!db.in_transaction());
    }

    #[test]
    fn connect_rejects_invalid_descriptor() {
        let result = connect(&DatabaseDescriptor::in_memory().with_prefix("no good"));
        assert!(matches!(result, Err(DbError::Config(_))));
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("dataset"), "\"dataset\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn row_builder() {
        let r = row([("a", 1.into()), ("b", "x".into())]);
        assert_eq!(r.len(), 2);
        assert_eq!(r["a"], FieldValue::Int(1));
    }
}
