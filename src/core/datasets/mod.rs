//! core::datasets
//!
//! Dataset types and dataset references.
//!
//! # Modules
//!
//! - [`dataset_type`] - [`DatasetType`]: name, dimensions, storage class
//! - [`dataset_ref`] - [`DatasetRef`]: one (possibly unresolved) dataset
//!
//! # Invariants
//!
//! - A ref is resolved iff it has an id, iff it has a run
//! - Components are only attached to resolved refs
//! - A ref's hash depends only on its dataset type name and data id

pub mod dataset_ref;
pub mod dataset_type;

pub use dataset_ref::DatasetRef;
pub use dataset_type::DatasetType;

use thiserror::Error;

use crate::core::dimensions::DimensionError;
use crate::core::storage_class::StorageClassError;
use crate::core::types::TypeError;

/// Errors from dataset type and reference operations.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error(transparent)]
    InvalidName(#[from] TypeError),

    #[error(transparent)]
    Dimension(#[from] DimensionError),

    #[error(transparent)]
    StorageClass(#[from] StorageClassError),

    /// The operation needs a resolved ref.
    #[error("dataset ref for '{0}' is not resolved")]
    Unresolved(String),

    /// The parent's storage class declares no such component.
    #[error("storage class '{storage_class}' has no component '{component}'")]
    UnknownComponent {
        component: String,
        storage_class: String,
    },

    /// The child's storage class differs from the declared one.
    #[error("component '{component}' must have storage class '{expected}', not '{actual}'")]
    ComponentMismatch {
        component: String,
        expected: String,
        actual: String,
    },
}
