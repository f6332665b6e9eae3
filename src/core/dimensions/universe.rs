//! core::dimensions::universe
//!
//! The validated, immutable dimension ontology.
//!
//! # Validation
//!
//! [`DimensionUniverse::new`] rejects a configuration unless:
//! - element names are unique
//! - every dependency names a declared element
//! - dependencies form a DAG
//! - an element requires everything its required dependencies require
//! - packers name known elements with integer keys and integer bound fields
//!
//! Nothing is returned on failure, so a partially built universe never
//! escapes.
//!
//! # Sharing
//!
//! A universe is an `Arc` handle. Cloning is cheap and every graph,
//! coordinate, and registry built from it points back at the same
//! definitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::element::{DimensionElement, PackerSpec, UniverseConfig};
use super::graph::DimensionGraph;
use super::packer::DimensionPacker;
use super::{DataCoordinate, DimensionError};
use crate::core::graph::DependencyGraph;
use crate::core::types::{FieldKind, KeyKind};

#[derive(Debug)]
struct UniverseInner {
    version: u32,
    /// Elements in global topological order.
    elements: Vec<DimensionElement>,
    /// Element name -> position in `elements`.
    index: HashMap<String, usize>,
    dependencies: DependencyGraph,
    packers: Vec<PackerSpec>,
}

/// The full set of dimension elements and packers.
#[derive(Debug, Clone)]
pub struct DimensionUniverse {
    inner: Arc<UniverseInner>,
}

impl DimensionUniverse {
    /// Validate a configuration and build a universe from it.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::InvalidDefinition`] for duplicate names, dangling
    ///   dependencies, inconsistent requirements, or malformed packers
    /// - [`DimensionError::CycleDetected`] if dependencies form a cycle
    pub fn new(config: UniverseConfig) -> Result<Self, DimensionError> {
        let mut dependencies = DependencyGraph::new();
        let mut declared: HashMap<&str, &DimensionElement> = HashMap::new();

        for element in &config.elements {
            if declared.insert(&element.name, element).is_some() {
                return Err(DimensionError::InvalidDefinition(format!(
                    "element '{}' is declared twice",
                    element.name
                )));
            }
            dependencies.add_node(element.name.clone(), element.dependencies().cloned());
        }

        for element in &config.elements {
            for dependency in element.dependencies() {
                if !declared.contains_key(dependency.as_str()) {
                    return Err(DimensionError::InvalidDefinition(format!(
                        "element '{}' depends on undeclared element '{}'",
                        element.name, dependency
                    )));
                }
            }
            check_fields(element)?;
        }

        let order = dependencies.closure(dependencies.nodes())?;

        for element in &config.elements {
            let own: HashSet<&String> = element.requires.iter().collect();
            for required in &element.requires {
                let parent = declared[required.as_str()];
                if let Some(missing) = parent.requires.iter().find(|r| !own.contains(r)) {
                    return Err(DimensionError::InvalidDefinition(format!(
                        "element '{}' requires '{}' but not its requirement '{}'",
                        element.name, required, missing
                    )));
                }
            }
        }

        let mut by_name: HashMap<String, DimensionElement> = config
            .elements
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();
        let mut elements = Vec::with_capacity(order.len());
        let mut index = HashMap::with_capacity(order.len());
        for name in order {
            if let Some(element) = by_name.remove(&name) {
                index.insert(name, elements.len());
                elements.push(element);
            }
        }

        let universe = Self {
            inner: Arc::new(UniverseInner {
                version: config.version,
                elements,
                index,
                dependencies,
                packers: config.packers,
            }),
        };
        for packer in &universe.inner.packers {
            universe.check_packer(packer)?;
        }

        tracing::debug!(
            elements = universe.inner.elements.len(),
            packers = universe.inner.packers.len(),
            "built dimension universe"
        );
        Ok(universe)
    }

    /// The built-in observational universe.
    pub fn observational() -> Result<Self, DimensionError> {
        Self::new(UniverseConfig::observational())
    }

    /// Configuration version number.
    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// All elements in topological order.
    pub fn elements(&self) -> impl Iterator<Item = &DimensionElement> {
        self.inner.elements.iter()
    }

    /// Look up an element by name.
    pub fn element(&self, name: &str) -> Option<&DimensionElement> {
        self.inner.index.get(name).map(|&i| &self.inner.elements[i])
    }

    /// Look up an element by name, failing if it is unknown.
    pub fn get(&self, name: &str) -> Result<&DimensionElement, DimensionError> {
        self.element(name)
            .ok_or_else(|| DimensionError::UnknownDimension(name.to_string()))
    }

    /// Position of an element in the global topological order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    /// Packer definitions.
    pub fn packers(&self) -> &[PackerSpec] {
        &self.inner.packers
    }

    /// Check whether two handles refer to the same universe.
    pub fn same_as(&self, other: &DimensionUniverse) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Extract the dependency closure of `names` as a graph.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::UnknownDimension`] for unrecognized names
    /// - [`DimensionError::CycleDetected`] if the closure contains a cycle
    pub fn extract<I, S>(&self, names: I) -> Result<DimensionGraph, DimensionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        let closure = self
            .inner
            .dependencies
            .closure(names.iter().map(|n| n.as_ref()))?;
        Ok(DimensionGraph::from_closure(self.clone(), closure))
    }

    /// The graph with no dimensions.
    pub fn empty(&self) -> DimensionGraph {
        DimensionGraph::from_closure(self.clone(), Vec::new())
    }

    /// Build a named packer for the coordinate's fixed dimension value.
    ///
    /// `data_id` must be expanded with a record for the packer's fixed
    /// element, whose fields give the packing bounds.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::UnknownPacker`] if no packer has this name
    /// - Lookup errors if the fixed value or record is unavailable
    pub fn make_packer(
        &self,
        name: &str,
        data_id: &DataCoordinate,
    ) -> Result<DimensionPacker, DimensionError> {
        let spec = self
            .inner
            .packers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DimensionError::UnknownPacker(name.to_string()))?;
        DimensionPacker::new(self, spec.clone(), data_id)
    }

    fn check_packer(&self, packer: &PackerSpec) -> Result<(), DimensionError> {
        let invalid = |msg: String| {
            DimensionError::InvalidDefinition(format!("packer '{}': {}", packer.name, msg))
        };
        let fixed = self
            .element(&packer.fixed)
            .ok_or_else(|| invalid(format!("unknown fixed element '{}'", packer.fixed)))?;
        if packer.packed.is_empty() {
            return Err(invalid("no packed dimensions".into()));
        }
        for packed in &packer.packed {
            let element = self
                .element(&packed.dimension)
                .ok_or_else(|| invalid(format!("unknown dimension '{}'", packed.dimension)))?;
            if element.key.kind != KeyKind::Int {
                return Err(invalid(format!(
                    "dimension '{}' does not have an integer key",
                    packed.dimension
                )));
            }
            let bound = fixed.metadata.iter().find(|m| m.name == packed.max_field);
            if !matches!(bound, Some(m) if m.kind == FieldKind::Int) {
                return Err(invalid(format!(
                    "'{}' has no integer field '{}'",
                    fixed.name, packed.max_field
                )));
            }
        }
        Ok(())
    }
}

impl PartialEq for DimensionUniverse {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
            || (self.inner.version == other.inner.version
                && self.inner.elements == other.inner.elements)
    }
}

impl Eq for DimensionUniverse {}

fn check_fields(element: &DimensionElement) -> Result<(), DimensionError> {
    let mut seen: HashSet<&str> = element.dependencies().map(String::as_str).collect();
    seen.insert(&element.name);
    for field in &element.metadata {
        if !seen.insert(&field.name) || field.name == element.key.name {
            return Err(DimensionError::InvalidDefinition(format!(
                "element '{}' declares field '{}' more than once",
                element.name, field.name
            )));
        }
    }
    Ok(())
}
