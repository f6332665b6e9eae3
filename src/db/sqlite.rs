//! db::sqlite
//!
//! SQLite implementation of [`Database`].
//!
//! # Engine setup
//!
//! - Foreign keys are enabled on every connection
//! - The driver runs in autocommit mode; transactions are issued explicitly
//!   (`BEGIN IMMEDIATE`, then `SAVEPOINT` for nested scopes)
//! - File targets are opened read-only when the descriptor is not writeable
//!
//! # Type mapping
//!
//! | FieldKind   | SQLite column                          |
//! |-------------|----------------------------------------|
//! | `Int`       | `INTEGER`                              |
//! | `Float`     | `REAL`                                 |
//! | `Str`       | `TEXT`                                 |
//! | `Bytes`     | `BLOB`                                 |
//! | `Timestamp` | `INTEGER` (microseconds since epoch)   |

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};

use super::{quote, Database, DbError, NameShrinker, Row, TableSpec};
use crate::core::config::{Backend, DatabaseDescriptor};
use crate::core::types::{micros_to_timestamp, timestamp_to_micros, FieldKind, FieldValue};

/// SQLite places no practical limit on identifier length.
const SQLITE_IDENTIFIER_LENGTH: usize = 1024;

/// A single SQLite connection.
pub struct SqliteDatabase {
    conn: Connection,
    descriptor: DatabaseDescriptor,
    tables: RefCell<HashMap<String, TableSpec>>,
    shrinker: RefCell<NameShrinker>,
    depth: Cell<usize>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("target", &self.descriptor.target)
            .field("writeable", &self.descriptor.writeable)
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl SqliteDatabase {
    /// Open the database described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened (a read-only open
    /// never creates the file).
    pub fn open(descriptor: &DatabaseDescriptor) -> Result<Self, DbError> {
        let conn = if descriptor.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            let mode = if descriptor.writeable {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            } else {
                OpenFlags::SQLITE_OPEN_READ_ONLY
            };
            Connection::open_with_flags(
                &descriptor.target,
                mode | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let max_length = descriptor
            .max_identifier_length
            .unwrap_or(SQLITE_IDENTIFIER_LENGTH);
        tracing::debug!(
            target = %descriptor.target,
            writeable = descriptor.writeable,
            "opened sqlite database"
        );

        Ok(Self {
            conn,
            descriptor: descriptor.clone(),
            tables: RefCell::new(HashMap::new()),
            shrinker: RefCell::new(NameShrinker::new(max_length)),
            depth: Cell::new(0),
        })
    }

    fn check_writeable(&self) -> Result<(), DbError> {
        if self.descriptor.writeable {
            Ok(())
        } else {
            Err(DbError::ReadOnly)
        }
    }

    fn spec(&self, table: &str) -> Result<TableSpec, DbError> {
        self.table_spec(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))
    }

    fn column(&self, name: &str) -> String {
        quote(&self.shrink_name(name))
    }

    /// Reject columns that the table does not declare.
    fn check_columns<'r>(
        &self,
        spec: &TableSpec,
        columns: impl Iterator<Item = &'r String>,
    ) -> Result<(), DbError> {
        for column in columns {
            if spec.get(column).is_none() {
                return Err(DbError::Schema(format!(
                    "table '{}' has no column '{}'",
                    spec.name, column
                )));
            }
        }
        Ok(())
    }

    fn table_exists(&self, physical: &str) -> Result<bool, DbError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        let count: i64 = stmt.query_row([physical], |r| r.get(0))?;
        Ok(count > 0)
    }

    fn create_table(&self, spec: &TableSpec) -> Result<(), DbError> {
        let table = self.table_name(&spec.name);
        let mut parts = Vec::new();

        for field in &spec.fields {
            let mut def = format!("{} {}", self.column(&field.name), sql_type(field.kind));
            if field.autoincrement {
                def.push_str(" PRIMARY KEY AUTOINCREMENT");
            } else if !field.nullable {
                def.push_str(" NOT NULL");
            }
            parts.push(def);
        }

        let primary_key = spec.primary_key();
        let has_autoincrement = spec.fields.iter().any(|f| f.autoincrement);
        if !primary_key.is_empty() && !has_autoincrement {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote(&self.shrink_name(&format!("{}_pkey", table))),
                self.column_list(&primary_key)
            ));
        }

        for (n, columns) in spec.unique.iter().enumerate() {
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote(&self.shrink_name(&format!("{}_unq_{}", table, n))),
                self.column_list(columns)
            ));
        }

        for (n, fk) in spec.foreign_keys.iter().enumerate() {
            let mut def = format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote(&self.shrink_name(&format!("{}_fkey_{}", table, n))),
                self.column_list(&fk.columns),
                quote(&self.table_name(&fk.target)),
                self.column_list(&fk.target_columns)
            );
            if fk.on_delete_cascade {
                def.push_str(" ON DELETE CASCADE");
            }
            parts.push(def);
        }

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            quote(&table),
            parts.join(",\n    ")
        );
        for (n, columns) in spec.indexes.iter().enumerate() {
            sql.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS {} ON {} ({});",
                quote(&self.shrink_name(&format!("{}_idx_{}", table, n))),
                quote(&table),
                self.column_list(columns)
            ));
        }

        tracing::trace!(sql = %sql, "create table");
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn column_list<S: AsRef<str>>(&self, columns: &[S]) -> String {
        columns
            .iter()
            .map(|c| self.column(c.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `WHERE` clause matching every column of `filter` (NULL-safe).
    fn where_clause(&self, filter: &Row, first_param: usize) -> String {
        if filter.is_empty() {
            return String::new();
        }
        let terms: Vec<String> = filter
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} IS ?{}", self.column(column), first_param + i))
            .collect();
        format!(" WHERE {}", terms.join(" AND "))
    }

    fn execute(&self, sql: &str, values: &[FieldValue]) -> Result<usize, DbError> {
        tracing::trace!(sql = %sql, "execute");
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(values.iter().map(to_value)))?)
    }
}

impl Database for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn origin(&self) -> i64 {
        self.descriptor.origin
    }

    fn is_writeable(&self) -> bool {
        self.descriptor.writeable
    }

    fn max_identifier_length(&self) -> usize {
        self.shrinker.borrow().max_length()
    }

    fn begin(&self, interrupting: bool) -> Result<(), DbError> {
        let depth = self.depth.get();
        if depth == 0 {
            let sql = if self.descriptor.writeable {
                "BEGIN IMMEDIATE"
            } else {
                "BEGIN DEFERRED"
            };
            self.conn.execute_batch(sql)?;
        } else if interrupting {
            return Err(DbError::NestedInterrupting);
        } else {
            self.conn.execute_batch(&format!("SAVEPOINT sp_{}", depth))?;
        }
        self.depth.set(depth + 1);
        tracing::trace!(depth = depth + 1, "begin");
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        let depth = self.depth.get();
        match depth {
            0 => return Err(DbError::NoTransaction),
            1 => self.conn.execute_batch("COMMIT")?,
            n => self
                .conn
                .execute_batch(&format!("RELEASE SAVEPOINT sp_{}", n - 1))?,
        }
        self.depth.set(depth - 1);
        tracing::trace!(depth = depth - 1, "commit");
        Ok(())
    }

    fn rollback(&self) -> Result<(), DbError> {
        let depth = self.depth.get();
        if depth == 0 {
            return Err(DbError::NoTransaction);
        }
        self.depth.set(depth - 1);
        tracing::debug!(depth, "rollback");
        if depth == 1 {
            self.conn.execute_batch("ROLLBACK")?;
        } else {
            self.conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT sp_{n}; RELEASE SAVEPOINT sp_{n}",
                n = depth - 1
            ))?;
        }
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.depth.get()
    }

    fn shrink_name(&self, name: &str) -> String {
        self.shrinker.borrow_mut().shrink(name)
    }

    fn expand_name(&self, name: &str) -> String {
        self.shrinker.borrow().expand(name)
    }

    fn table_name(&self, logical: &str) -> String {
        match &self.descriptor.prefix {
            Some(prefix) => self.shrink_name(&format!("{}{}", prefix, logical)),
            None => self.shrink_name(logical),
        }
    }

    fn declare_tables(&self, specs: &[TableSpec], create: bool) -> Result<(), DbError> {
        if create {
            self.check_writeable()?;
        }
        for spec in specs {
            if create {
                self.create_table(spec)?;
            } else if !self.table_exists(&self.table_name(&spec.name))? {
                return Err(DbError::Schema(format!(
                    "table '{}' does not exist",
                    spec.name
                )));
            }
            self.tables
                .borrow_mut()
                .insert(spec.name.clone(), spec.clone());
        }
        Ok(())
    }

    fn table_spec(&self, table: &str) -> Option<TableSpec> {
        self.tables.borrow().get(table).cloned()
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<i64>, DbError> {
        self.check_writeable()?;
        let spec = self.spec(table)?;
        let physical = quote(&self.table_name(table));

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            self.check_columns(&spec, row.keys())?;
            let sql = if row.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", physical)
            } else {
                let columns: Vec<&String> = row.keys().collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    physical,
                    self.column_list(&columns),
                    placeholders(columns.len())
                )
            };
            let values: Vec<FieldValue> = row.values().cloned().collect();
            self.execute(&sql, &values)?;
            ids.push(self.conn.last_insert_rowid());
        }
        Ok(ids)
    }

    fn replace(&self, table: &str, rows: &[Row]) -> Result<(), DbError> {
        self.check_writeable()?;
        let spec = self.spec(table)?;
        let physical = quote(&self.table_name(table));
        let primary_key = spec.primary_key();

        for row in rows {
            self.check_columns(&spec, row.keys())?;
            let columns: Vec<&String> = row.keys().collect();
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| !primary_key.contains(&c.as_str()))
                .map(|c| {
                    let column = self.column(c);
                    format!("{column} = excluded.{column}")
                })
                .collect();
            let conflict = if primary_key.is_empty() {
                String::new()
            } else if updates.is_empty() {
                format!(
                    " ON CONFLICT ({}) DO NOTHING",
                    self.column_list(&primary_key)
                )
            } else {
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    self.column_list(&primary_key),
                    updates.join(", ")
                )
            };
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                physical,
                self.column_list(&columns),
                placeholders(columns.len()),
                conflict
            );
            let values: Vec<FieldValue> = row.values().cloned().collect();
            self.execute(&sql, &values)?;
        }
        Ok(())
    }

    fn delete(&self, table: &str, rows: &[Row]) -> Result<usize, DbError> {
        self.check_writeable()?;
        let spec = self.spec(table)?;
        let physical = quote(&self.table_name(table));

        let mut deleted = 0;
        for row in rows {
            self.check_columns(&spec, row.keys())?;
            let sql = format!("DELETE FROM {}{}", physical, self.where_clause(row, 1));
            let values: Vec<FieldValue> = row.values().cloned().collect();
            deleted += self.execute(&sql, &values)?;
        }
        Ok(deleted)
    }

    fn fetch(&self, table: &str, filter: &Row) -> Result<Vec<Row>, DbError> {
        let spec = self.spec(table)?;
        self.check_columns(&spec, filter.keys())?;

        let names: Vec<&str> = spec.column_names().collect();
        let kinds: Vec<FieldKind> = spec.fields.iter().map(|f| f.kind).collect();
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            self.column_list(&names),
            quote(&self.table_name(table)),
            self.where_clause(filter, 1)
        );
        let primary_key = spec.primary_key();
        if !primary_key.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.column_list(&primary_key)));
        }

        let params: Vec<FieldValue> = filter.values().cloned().collect();
        let rows = self.query(&sql, &params, &kinds)?;
        Ok(rows
            .into_iter()
            .map(|values| {
                names
                    .iter()
                    .map(|n| n.to_string())
                    .zip(values)
                    .collect::<Row>()
            })
            .collect())
    }

    fn query(
        &self,
        sql: &str,
        params: &[FieldValue],
        kinds: &[FieldKind],
    ) -> Result<Vec<Vec<FieldValue>>, DbError> {
        tracing::trace!(sql = %sql, params = params.len(), "query");
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_value)))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(kinds.len());
            for (i, kind) in kinds.iter().enumerate() {
                values.push(decode(row, i, *kind)?);
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Int | FieldKind::Timestamp => "INTEGER",
        FieldKind::Float => "REAL",
        FieldKind::Str => "TEXT",
        FieldKind::Bytes => "BLOB",
    }
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Int(v) => Value::Integer(*v),
        FieldValue::Float(v) => Value::Real(*v),
        FieldValue::Str(s) => Value::Text(s.clone()),
        FieldValue::Bytes(b) => Value::Blob(b.clone()),
        FieldValue::Timestamp(t) => Value::Integer(timestamp_to_micros(t)),
    }
}

fn decode(row: &rusqlite::Row<'_>, index: usize, kind: FieldKind) -> Result<FieldValue, DbError> {
    let value = match kind {
        FieldKind::Int => row.get::<_, Option<i64>>(index)?.into(),
        FieldKind::Float => row.get::<_, Option<f64>>(index)?.into(),
        FieldKind::Str => row.get::<_, Option<String>>(index)?.into(),
        FieldKind::Bytes => row.get::<_, Option<Vec<u8>>>(index)?.into(),
        FieldKind::Timestamp => match row.get::<_, Option<i64>>(index)? {
            Some(micros) => FieldValue::Timestamp(
                micros_to_timestamp(micros).map_err(|e| DbError::Schema(e.to_string()))?,
            ),
            None => FieldValue::Null,
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{row, FieldSpec};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn people() -> TableSpec {
        TableSpec::new("person")
            .field(FieldSpec::new("id", FieldKind::Int).autoincrement())
            .field(FieldSpec::new("name", FieldKind::Str).not_null())
            .field(FieldSpec::new("born", FieldKind::Timestamp))
            .field(FieldSpec::new("height", FieldKind::Float))
            .unique(&["name"])
    }

    fn open(descriptor: DatabaseDescriptor) -> SqliteDatabase {
        let db = SqliteDatabase::open(&descriptor).expect("open");
        db.declare_tables(&[people()], descriptor.writeable)
            .expect("declare");
        db
    }

    #[test]
    fn insert_assigns_ids() {
        let db = open(DatabaseDescriptor::in_memory());
        let ids = db
            .insert(
                "person",
                &[
                    row([("name", "ada".into())]),
                    row([("name", "bob".into())]),
                ],
            )
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn timestamps_and_nulls_round_trip() {
        let db = open(DatabaseDescriptor::in_memory());
        let born = NaiveDate::from_ymd_opt(1815, 12, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        db.insert(
            "person",
            &[row([("name", "ada".into()), ("born", born.into())])],
        )
        .unwrap();

        let rows = db
            .fetch("person", &row([("name", "ada".into())]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["born"], FieldValue::Timestamp(born));
        assert!(rows[0]["height"].is_null());
    }

    #[test]
    fn unique_violation_is_integrity_error() {
        let db = open(DatabaseDescriptor::in_memory());
        db.insert("person", &[row([("name", "ada".into())])]).unwrap();
        let err = db
            .insert("person", &[row([("name", "ada".into())])])
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn unknown_table_and_column() {
        let db = open(DatabaseDescriptor::in_memory());
        assert!(matches!(
            db.fetch("nobody", &Row::new()),
            Err(DbError::UnknownTable(_))
        ));
        assert!(matches!(
            db.insert("person", &[row([("age", 3.into())])]),
            Err(DbError::Schema(_))
        ));
    }

    #[test]
    fn delete_matches_nulls() {
        let db = open(DatabaseDescriptor::in_memory());
        db.insert("person", &[row([("name", "ada".into())])]).unwrap();
        let deleted = db
            .delete(
                "person",
                &[row([("name", "ada".into()), ("height", FieldValue::Null)])],
            )
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn nested_savepoints() {
        let db = open(DatabaseDescriptor::in_memory());
        db.begin(false).unwrap();
        db.insert("person", &[row([("name", "outer".into())])]).unwrap();
        db.begin(false).unwrap();
        db.insert("person", &[row([("name", "inner".into())])]).unwrap();
        assert_eq!(db.transaction_depth(), 2);
        db.rollback().unwrap();
        db.commit().unwrap();
        assert_eq!(db.transaction_depth(), 0);

        let rows = db.fetch("person", &Row::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], FieldValue::from("outer"));
        assert!(matches!(db.commit(), Err(DbError::NoTransaction)));
    }

    #[test]
    fn prefix_and_shrinking_are_transparent() {
        let descriptor = DatabaseDescriptor::in_memory()
            .with_prefix("catalog_namespace_")
            .with_max_identifier_length(20);
        let db = open(descriptor);
        db.insert("person", &[row([("name", "ada".into())])]).unwrap();
        assert_eq!(db.count_rows("person").unwrap(), 1);

        let physical = db.table_name("person");
        assert!(physical.len() <= 20);
        assert_eq!(db.expand_name(&physical), "catalog_namespace_person");
    }

    #[test]
    fn read_only_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.sqlite3");
        {
            let db = open(DatabaseDescriptor::sqlite_file(&path));
            db.insert("person", &[row([("name", "ada".into())])]).unwrap();
        }

        let db = open(DatabaseDescriptor::sqlite_file(&path).read_only());
        assert!(!db.is_writeable());
        assert_eq!(db.fetch("person", &Row::new()).unwrap().len(), 1);
        assert!(matches!(
            db.insert("person", &[row([("name", "bob".into())])]),
            Err(DbError::ReadOnly)
        ));
        assert!(matches!(
            db.replace("person", &[row([("name", "bob".into())])]),
            Err(DbError::ReadOnly)
        ));
    }

    #[test]
    fn declare_without_create_requires_table() {
        let db = SqliteDatabase::open(&DatabaseDescriptor::in_memory()).unwrap();
        assert!(matches!(
            db.declare_tables(&[people()], false),
            Err(DbError::Schema(_))
        ));
    }
}
