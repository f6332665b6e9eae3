//! query
//!
//! Dimension and dataset queries.
//!
//! # Architecture
//!
//! A [`QuerySpec`] names the dimensions to return, the dataset types that
//! must exist for each result (with the collections to search), a data id
//! constraint, and an optional predicate. [`parse_expression`] turns the
//! predicate into an [`Expr`]; [`QueryBuilder`] plans the joins and renders
//! one SQL statement that the registry pages through.
//!
//! # Predicate language
//!
//! ```text
//! visit = 10 AND detector > 1
//! tract IN (1, 5) AND patch IN (2..7:5)
//! physical_filter = 'dummy_r' OR NOT visit.seeing < 0.8
//! exposure.datetime_begin > T'2005-12-15 02:00:00'
//! ```
//!
//! Bare identifiers name dimensions; `element.field` names a record field.
//! Keywords are case-insensitive.

mod builder;
mod expr;
mod parser;

pub use builder::{QueryBuilder, QueryPlan};
pub use expr::{BinaryOp, Expr, Identifier, InItem, Literal, UnaryOp};
pub use parser::parse_expression;

use thiserror::Error;

use crate::core::datasets::DatasetType;
use crate::core::dimensions::{DimensionError, RawDataId};

/// Errors from parsing and planning queries.
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    /// The predicate does not parse.
    #[error("syntax error in '{expression}': {message}")]
    Syntax { expression: String, message: String },

    /// The predicate names a dimension or field that does not exist.
    #[error("unknown identifier in query: {0}")]
    UnknownIdentifier(String),

    #[error(transparent)]
    Dimension(#[from] DimensionError),

    /// The query cannot be answered as posed.
    #[error("invalid query: {0}")]
    Invalid(String),
}

/// What a query asks for.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Dimensions each result carries (closed under dependencies).
    pub dimensions: Vec<String>,
    /// Dataset types that must have a dataset matching each result, with the
    /// collections searched for it.
    pub datasets: Vec<(DatasetType, Vec<String>)>,
    /// Fixed dimension values.
    pub data_id: RawDataId,
    /// Predicate over dimensions and record fields.
    pub predicate: Option<String>,
    /// Whether results are expanded with implied values and records.
    pub expand: bool,
}

impl QuerySpec {
    /// A query returning `dimensions`.
    pub fn new<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimensions: dimensions.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Require a dataset of `dataset_type` in one of `collections`.
    pub fn with_dataset<I, S>(mut self, dataset_type: &DatasetType, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datasets.push((
            dataset_type.clone(),
            collections.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn with_data_id(mut self, data_id: RawDataId) -> Self {
        self.data_id = data_id;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Expand each result with implied values and dimension records.
    pub fn expanded(mut self) -> Self {
        self.expand = true;
        self
    }
}
