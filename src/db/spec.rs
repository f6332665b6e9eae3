//! db::spec
//!
//! Backend-neutral table definitions.
//!
//! Table and column names in a [`TableSpec`] are logical. Backends apply
//! table prefixes and identifier shrinking when they emit DDL.

use crate::core::types::FieldKind;

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub primary_key: bool,
    /// Integer primary key assigned by the backend.
    pub autoincrement: bool,
}

impl FieldSpec {
    /// A nullable column.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            primary_key: false,
            autoincrement: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Make this column part of the primary key (implies not null).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Make this column an autoincrement integer primary key.
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self.kind = FieldKind::Int;
        self.primary_key()
    }
}

/// A foreign key from columns of one table to columns of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub columns: Vec<String>,
    /// Logical name of the referenced table.
    pub target: String,
    pub target_columns: Vec<String>,
    pub on_delete_cascade: bool,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub indexes: Vec<Vec<String>>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.unique
            .push(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn index<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.indexes
            .push(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn foreign_key<S: AsRef<str>, T: AsRef<str>>(
        mut self,
        columns: &[S],
        target: &str,
        target_columns: &[T],
        on_delete_cascade: bool,
    ) -> Self {
        self.foreign_keys.push(ForeignKeySpec {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            target: target.to_string(),
            target_columns: target_columns
                .iter()
                .map(|c| c.as_ref().to_string())
                .collect(),
            on_delete_cascade,
        });
        self
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn get(&self, column: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
