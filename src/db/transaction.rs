//! db::transaction
//!
//! Scoped transactions.
//!
//! # Invariants
//!
//! - A scope is either committed or rolled back exactly once
//! - Dropping an open scope rolls it back (RAII pattern)
//! - Scopes nest strictly; rollback unwinds only the innermost scope

use super::{Database, DbError};

/// An open transaction scope.
///
/// Rolled back automatically on drop unless [`Transaction::commit`] was
/// called, so a `?` inside the scope never leaves half-written state behind.
///
/// # Example
///
/// ```
/// use dimcat::core::config::DatabaseDescriptor;
/// use dimcat::db::{self, Transaction};
///
/// let db = db::connect(&DatabaseDescriptor::in_memory()).unwrap();
/// {
///     let tx = Transaction::begin(db.as_ref(), false).unwrap();
///     assert!(db.in_transaction());
///     tx.commit().unwrap();
/// }
/// assert!(!db.in_transaction());
/// ```
pub struct Transaction<'a> {
    db: &'a dyn Database,
    /// True until committed or rolled back.
    open: bool,
}

impl<'a> Transaction<'a> {
    /// Open a scope on `db`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NestedInterrupting`] if `interrupting` is set and a
    /// transaction is already active.
    pub fn begin(db: &'a dyn Database, interrupting: bool) -> Result<Self, DbError> {
        db.begin(interrupting)?;
        Ok(Self { db, open: true })
    }

    /// Commit the scope.
    ///
    /// If the engine refuses the commit the scope stays open and is rolled
    /// back when dropped.
    pub fn commit(mut self) -> Result<(), DbError> {
        self.db.commit()?;
        self.open = false;
        Ok(())
    }

    /// Roll back the scope explicitly.
    pub fn rollback(mut self) -> Result<(), DbError> {
        self.open = false;
        self.db.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // Best-effort rollback; errors cannot propagate out of drop
        if self.open {
            if let Err(e) = self.db.rollback() {
                tracing::warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

/// Run `f` inside a transaction scope.
///
/// Commits when `f` returns `Ok`; rolls back to the start of the scope when
/// it returns `Err`, and hands the error back unchanged.
pub fn transaction<T, E, F>(db: &dyn Database, interrupting: bool, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<DbError>,
{
    let tx = Transaction::begin(db, interrupting)?;
    match f() {
        Ok(value) => {
            tx.commit()?;
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
