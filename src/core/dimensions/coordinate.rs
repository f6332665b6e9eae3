//! core::dimensions::coordinate
//!
//! Data coordinates: points in a dimension graph's space.
//!
//! # States
//!
//! - **Minimal**: one value per required dimension of the graph
//! - **Expanded**: additionally carries implied dimension values and one
//!   record per graph element that has a table
//!
//! Equality and hashing consider only the graph and the required values,
//! so a minimal and an expanded coordinate for the same point are equal.
//!
//! # Example
//!
//! ```
//! use dimcat::core::dimensions::{DataCoordinate, DimensionUniverse, RawDataId};
//!
//! let universe = DimensionUniverse::observational().unwrap();
//! let graph = universe.extract(["detector"]).unwrap();
//! let raw = RawDataId::new().with("instrument", "DummyCam").with("detector", 1);
//!
//! let coordinate = DataCoordinate::standardize(&raw, &graph).unwrap();
//! assert_eq!(coordinate.get("detector").and_then(|v| v.as_int()), Some(1));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::graph::DimensionGraph;
use super::record::DimensionRecord;
use super::DimensionError;
use crate::core::types::DataValue;

/// An unvalidated dimension-name to value mapping.
///
/// This is the input to [`DataCoordinate::standardize`]. Keys that the
/// target graph does not need are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDataId(BTreeMap<String, DataValue>);

impl RawDataId {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every entry of `other` into this mapping, overriding on collision.
    pub fn merge(mut self, other: &RawDataId) -> Self {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for RawDataId {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&DataCoordinate> for RawDataId {
    /// Required values plus implied values, when the coordinate is expanded.
    fn from(coordinate: &DataCoordinate) -> Self {
        let mut raw = RawDataId(coordinate.values.clone());
        if let Some(expansion) = &coordinate.expansion {
            for (k, v) in &expansion.implied {
                raw.0.insert(k.clone(), v.clone());
            }
        }
        raw
    }
}

/// Implied values and records attached to an expanded coordinate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expansion {
    pub implied: BTreeMap<String, DataValue>,
    pub records: BTreeMap<String, DimensionRecord>,
}

/// A validated point in a [`DimensionGraph`]'s space.
#[derive(Clone)]
pub struct DataCoordinate {
    graph: DimensionGraph,
    values: BTreeMap<String, DataValue>,
    expansion: Option<Arc<Expansion>>,
}

impl DataCoordinate {
    /// Conform a raw mapping to `graph.required`.
    ///
    /// Extra keys are ignored. Implied values present in `raw` (for example
    /// when it was built from an expanded coordinate) satisfy required
    /// dimensions of `graph` that they name.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::MissingValue`] if a required value is absent
    /// - [`DimensionError::WrongKind`] if a value has the wrong kind
    pub fn standardize(raw: &RawDataId, graph: &DimensionGraph) -> Result<Self, DimensionError> {
        let mut values = BTreeMap::new();
        for name in graph.required() {
            let value = raw.get(name).ok_or_else(|| DimensionError::MissingValue {
                dimension: name.clone(),
                required: graph.required().join(", "),
            })?;
            values.insert(name.clone(), value.clone());
        }
        Self::from_parts(graph.clone(), values)
    }

    /// Conform an existing coordinate to another graph.
    ///
    /// When `graph` equals this coordinate's graph the coordinate is returned
    /// as is. Otherwise required values come from this coordinate's required
    /// and implied values, and the result stays expanded when every record
    /// it needs is already attached.
    pub fn subset(&self, graph: &DimensionGraph) -> Result<Self, DimensionError> {
        if &self.graph == graph {
            return Ok(self.clone());
        }
        let coordinate = Self::standardize(&RawDataId::from(self), graph)?;
        let Some(expansion) = &self.expansion else {
            return Ok(coordinate);
        };

        let mut implied = BTreeMap::new();
        for name in graph.implied() {
            match expansion
                .implied
                .get(name)
                .or_else(|| self.values.get(name))
            {
                Some(v) => {
                    implied.insert(name.clone(), v.clone());
                }
                None => return Ok(coordinate),
            }
        }
        let mut records = BTreeMap::new();
        for element in graph.with_tables() {
            match expansion.records.get(&element.name) {
                Some(r) => {
                    records.insert(element.name.clone(), r.clone());
                }
                None => return Ok(coordinate),
            }
        }
        coordinate.with_expansion(Expansion { implied, records })
    }

    /// Build from exact required values.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::KeyMismatch`] unless the keys equal `graph.required`
    /// - [`DimensionError::WrongKind`] if a value has the wrong kind
    pub fn from_parts(
        graph: DimensionGraph,
        values: BTreeMap<String, DataValue>,
    ) -> Result<Self, DimensionError> {
        let keys_match = values.len() == graph.required().len()
            && graph.required().iter().all(|n| values.contains_key(n));
        if !keys_match {
            return Err(DimensionError::KeyMismatch {
                actual: values.keys().cloned().collect::<Vec<_>>().join(", "),
                required: graph.required().join(", "),
            });
        }
        for (name, value) in &values {
            check_kind(&graph, name, value)?;
        }
        Ok(Self {
            graph,
            values,
            expansion: None,
        })
    }

    /// The coordinate with no dimensions.
    pub fn empty(graph: DimensionGraph) -> Result<Self, DimensionError> {
        Self::from_parts(graph, BTreeMap::new())
    }

    /// Attach implied values and records.
    ///
    /// An implied value may be absent when the record linking to it leaves
    /// the link null (an exposure taken outside any visit); elements keyed
    /// on an absent value then have no record either.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::WrongKind`] if an implied value has the wrong kind
    /// - [`DimensionError::MissingRecord`] if an element with a table has no record
    pub fn with_expansion(mut self, expansion: Expansion) -> Result<Self, DimensionError> {
        let mut absent = Vec::new();
        for name in self.graph.implied() {
            match expansion.implied.get(name) {
                Some(value) => check_kind(&self.graph, name, value)?,
                None => absent.push(name.as_str()),
            }
        }
        for element in self.graph.with_tables() {
            let keyed_on_absent = element
                .primary_key_names()
                .iter()
                .any(|k| absent.contains(k));
            if !keyed_on_absent && !expansion.records.contains_key(&element.name) {
                return Err(DimensionError::MissingRecord(element.name.clone()));
            }
        }
        self.expansion = Some(Arc::new(expansion));
        Ok(self)
    }

    pub fn graph(&self) -> &DimensionGraph {
        &self.graph
    }

    /// Value of a required dimension, or of an implied one when expanded.
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.values.get(name).or_else(|| {
            self.expansion
                .as_ref()
                .and_then(|e| e.implied.get(name))
        })
    }

    /// Required values in name order.
    pub fn values(&self) -> &BTreeMap<String, DataValue> {
        &self.values
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion.is_some()
    }

    pub fn expansion(&self) -> Option<&Expansion> {
        self.expansion.as_deref()
    }

    /// The attached record for an element.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError::MissingRecord`] if the coordinate is not
    /// expanded or has no record for `element`.
    pub fn record(&self, element: &str) -> Result<&DimensionRecord, DimensionError> {
        self.expansion
            .as_ref()
            .and_then(|e| e.records.get(element))
            .ok_or_else(|| DimensionError::MissingRecord(element.to_string()))
    }

    /// Stable bytes identifying this coordinate.
    ///
    /// Sorted `(key, value)` pairs, each component length-prefixed with a
    /// big-endian `u32`.
    pub fn fingerprint(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (key, value) in &self.values {
            let value = value.fingerprint_bytes();
            bytes.extend_from_slice(&(key.len() as u32).to_be_bytes());
            bytes.extend_from_slice(key.as_bytes());
            bytes.extend_from_slice(&(value.len() as u32).to_be_bytes());
            bytes.extend_from_slice(&value);
        }
        bytes
    }
}

fn check_kind(graph: &DimensionGraph, name: &str, value: &DataValue) -> Result<(), DimensionError> {
    let element = graph.universe().get(name)?;
    if value.kind() != element.key.kind {
        return Err(DimensionError::WrongKind {
            dimension: name.to_string(),
            expected: element.key.kind,
        });
    }
    Ok(())
}

impl PartialEq for DataCoordinate {
    fn eq(&self, other: &Self) -> bool {
        self.graph == other.graph && self.values == other.values
    }
}

impl Eq for DataCoordinate {}

impl Hash for DataCoordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.graph.hash(state);
        self.values.hash(state);
    }
}

impl fmt::Display for DataCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, name) in self.graph.required().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if let Some(value) = self.values.get(name) {
                write!(f, "{}: {}", name, value)?;
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for DataCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCoordinate")
            .field("values", &self.values)
            .field("expanded", &self.is_expanded())
            .finish()
    }
}
