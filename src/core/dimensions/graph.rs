//! core::dimensions::graph
//!
//! Closed sets of dimension elements.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::element::DimensionElement;
use super::universe::DimensionUniverse;
use super::DimensionError;

/// The closure of a set of dimensions under required and implied dependencies.
///
/// Elements are held in the universe's global topological order, so two
/// graphs with the same elements are identical. An element is **implied**
/// when another element of the graph implies it; every other element is
/// **required**, and a data id on this graph has exactly one value per
/// required element.
#[derive(Clone)]
pub struct DimensionGraph {
    universe: DimensionUniverse,
    names: Vec<String>,
    required: Vec<String>,
    implied: Vec<String>,
}

impl DimensionGraph {
    /// Build from a dependency-closed set of element names.
    pub(crate) fn from_closure(universe: DimensionUniverse, mut names: Vec<String>) -> Self {
        names.sort_by_key(|n| universe.position(n).unwrap_or(usize::MAX));
        names.dedup();

        let implied: Vec<String> = names
            .iter()
            .filter(|name| {
                names.iter().any(|other| {
                    universe
                        .element(other)
                        .map_or(false, |e| e.implies.iter().any(|i| i == *name))
                })
            })
            .cloned()
            .collect();
        let required = names
            .iter()
            .filter(|n| !implied.contains(n))
            .cloned()
            .collect();

        Self {
            universe,
            names,
            required,
            implied,
        }
    }

    /// The universe this graph belongs to.
    pub fn universe(&self) -> &DimensionUniverse {
        &self.universe
    }

    /// All element names, in topological order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Required element names, in topological order.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Implied element names, in topological order.
    pub fn implied(&self) -> &[String] {
        &self.implied
    }

    /// All elements, in topological order.
    pub fn elements(&self) -> impl Iterator<Item = &DimensionElement> {
        self.names.iter().filter_map(|n| self.universe.element(n))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check whether every element of this graph is in `other`.
    pub fn is_subset(&self, other: &DimensionGraph) -> bool {
        self.names.iter().all(|n| other.contains(n))
    }

    /// The smallest graph containing both graphs.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError::InvalidDefinition`] if the graphs come from
    /// different universes.
    pub fn union(&self, other: &DimensionGraph) -> Result<DimensionGraph, DimensionError> {
        if self.universe != other.universe {
            return Err(DimensionError::InvalidDefinition(
                "cannot combine graphs from different universes".into(),
            ));
        }
        self.universe
            .extract(self.names.iter().chain(other.names.iter()))
    }

    /// Elements whose records carry a time interval or instant.
    pub fn temporal(&self) -> impl Iterator<Item = &DimensionElement> {
        self.elements().filter(|e| e.temporal.is_some())
    }

    /// Elements whose records carry sky-pixel overlaps.
    pub fn spatial(&self) -> impl Iterator<Item = &DimensionElement> {
        self.elements().filter(|e| e.spatial)
    }

    /// Elements stored in their own table.
    pub fn with_tables(&self) -> impl Iterator<Item = &DimensionElement> {
        self.elements().filter(|e| e.has_table)
    }
}

impl PartialEq for DimensionGraph {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for DimensionGraph {}

impl Hash for DimensionGraph {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.names.hash(state);
    }
}

impl fmt::Display for DimensionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.names.join(", "))
    }
}

impl fmt::Debug for DimensionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionGraph")
            .field("required", &self.required)
            .field("implied", &self.implied)
            .finish()
    }
}
