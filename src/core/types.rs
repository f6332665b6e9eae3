//! core::types
//!
//! Strong types for core catalog concepts.
//!
//! # Types
//!
//! - [`DatasetId`] - Integer primary key of a dataset
//! - [`DataValue`] - Value of a dimension key (integer or string)
//! - [`FieldValue`] - Value of any dimension record field
//! - [`Timespan`] - Half-open `[begin, end)` time interval
//! - [`ContentHash`] - 32-byte digest identifying a (dataset type, data id)
//!
//! # Validation
//!
//! Dataset type names and collection names are validated at construction
//! time through [`validate_dataset_type_name`] and
//! [`validate_collection_name`]. Invalid names never reach the database.
//!
//! # Examples
//!
//! ```
//! use dimcat::core::types::{DataValue, Timespan, validate_dataset_type_name};
//! use chrono::NaiveDate;
//!
//! assert!(validate_dataset_type_name("calexp").is_ok());
//! assert!(validate_dataset_type_name("calexp.wcs").is_ok());
//! assert!(validate_dataset_type_name("bad name").is_err());
//!
//! let v: DataValue = 42.into();
//! assert_eq!(v.as_int(), Some(42));
//!
//! let night = NaiveDate::from_ymd_opt(2005, 12, 15).unwrap();
//! let span = Timespan::new(
//!     night.and_hms_opt(1, 0, 0),
//!     night.and_hms_opt(4, 0, 0),
//! );
//! assert!(span.contains(night.and_hms_opt(2, 0, 0).unwrap()));
//! assert!(!span.contains(night.and_hms_opt(4, 0, 0).unwrap()));
//! ```

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid dataset type name: {0}")]
    InvalidDatasetTypeName(String),

    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

/// Primary key of a dataset, unique within one registry origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(i64);

impl DatasetId {
    /// Wrap a raw integer id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw integer id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DatasetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of value a dimension key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Int,
    Str,
}

/// Value of a dimension key.
///
/// Dimension keys are either integers (`visit`, `detector`) or strings
/// (`instrument`, `physical_filter`). Values order integers before strings
/// so coordinates sort deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Int(i64),
    Str(String),
}

impl DataValue {
    /// Get the integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(v) => Some(*v),
            DataValue::Str(_) => None,
        }
    }

    /// Get the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Int(_) => None,
            DataValue::Str(s) => Some(s),
        }
    }

    /// The kind of this value.
    pub fn kind(&self) -> KeyKind {
        match self {
            DataValue::Int(_) => KeyKind::Int,
            DataValue::Str(_) => KeyKind::Str,
        }
    }

    /// Stable bytes for hashing: a one-byte tag followed by the payload.
    pub fn fingerprint_bytes(&self) -> Vec<u8> {
        match self {
            DataValue::Int(v) => {
                let mut bytes = vec![b'i'];
                bytes.extend_from_slice(&v.to_be_bytes());
                bytes
            }
            DataValue::Str(s) => {
                let mut bytes = vec![b's'];
                bytes.extend_from_slice(s.as_bytes());
                bytes
            }
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Int(i64::from(v))
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Str(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Str(v)
    }
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Int(v) => write!(f, "{}", v),
            DataValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// The kind of value a record field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Int,
    Float,
    Str,
    Bytes,
    Timestamp,
}

impl From<KeyKind> for FieldKind {
    fn from(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Int => FieldKind::Int,
            KeyKind::Str => FieldKind::Str,
        }
    }
}

/// Value of a dimension record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    /// Check if this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Convert to a dimension key value, if the field holds one.
    pub fn to_data_value(&self) -> Option<DataValue> {
        match self {
            FieldValue::Int(v) => Some(DataValue::Int(*v)),
            FieldValue::Str(s) => Some(DataValue::Str(s.clone())),
            _ => None,
        }
    }

    /// Get the timestamp, if the field holds one.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Get the string value, if the field holds one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer value, if the field holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<DataValue> for FieldValue {
    fn from(v: DataValue) -> Self {
        match v {
            DataValue::Int(i) => FieldValue::Int(i),
            DataValue::Str(s) => FieldValue::Str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(v: NaiveDateTime) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Convert a timestamp to integer microseconds since the Unix epoch.
pub fn timestamp_to_micros(t: &NaiveDateTime) -> i64 {
    t.and_utc().timestamp_micros()
}

/// Convert integer microseconds since the Unix epoch to a timestamp.
///
/// # Errors
///
/// Returns `TypeError::TimestampOutOfRange` if the value cannot be represented.
pub fn micros_to_timestamp(micros: i64) -> Result<NaiveDateTime, TypeError> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or(TypeError::TimestampOutOfRange(micros))
}

/// A half-open time interval `[begin, end)`.
///
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timespan {
    pub begin: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Timespan {
    /// Create a timespan from optional bounds.
    pub fn new(begin: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self { begin, end }
    }

    /// Check whether an instant falls inside the interval.
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.begin.map_or(true, |b| b <= instant) && self.end.map_or(true, |e| instant < e)
    }

    /// Check whether two intervals share at least one instant.
    pub fn overlaps(&self, other: &Timespan) -> bool {
        let starts_before_other_ends = match (self.begin, other.end) {
            (Some(b), Some(e)) => b < e,
            _ => true,
        };
        let other_starts_before_end = match (other.begin, self.end) {
            (Some(b), Some(e)) => b < e,
            _ => true,
        };
        starts_before_other_ends && other_starts_before_end
    }
}

/// A 32-byte content digest of a dataset type name and data id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, returning `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Get the digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Validate a dataset type name.
///
/// Names are one or more identifiers (`[A-Za-z_][A-Za-z0-9_]*`) joined by
/// `.`, where everything after the first `.` names a component.
///
/// # Errors
///
/// Returns `TypeError::InvalidDatasetTypeName` describing the first violation.
pub fn validate_dataset_type_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidDatasetTypeName(
            "dataset type name cannot be empty".into(),
        ));
    }
    for part in name.split('.') {
        let mut chars = part.chars();
        match chars.next() {
            None => {
                return Err(TypeError::InvalidDatasetTypeName(format!(
                    "'{name}' has an empty component"
                )))
            }
            Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
                return Err(TypeError::InvalidDatasetTypeName(format!(
                    "'{name}': '{part}' must start with a letter or underscore"
                )))
            }
            Some(_) => {}
        }
        if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(TypeError::InvalidDatasetTypeName(format!(
                "'{name}' cannot contain '{c}'"
            )));
        }
    }
    Ok(())
}

/// Validate a collection (or run) name.
///
/// # Errors
///
/// Returns `TypeError::InvalidCollectionName` for empty names or names
/// containing control characters.
pub fn validate_collection_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidCollectionName(
            "collection name cannot be empty".into(),
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(TypeError::InvalidCollectionName(
            "collection name cannot contain control characters".into(),
        ));
    }
    Ok(())
}
