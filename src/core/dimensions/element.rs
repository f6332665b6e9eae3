//! core::dimensions::element
//!
//! Dimension element definitions.
//!
//! # Overview
//!
//! A [`DimensionElement`] is one named coordinate axis. It declares:
//! - a primary key field (`name` for string keys, `id` for integer keys)
//! - **required** dependencies, whose values are part of its primary key
//! - **implied** dependencies, whose values its records determine
//! - metadata fields stored alongside each record
//! - optional temporal and spatial roles
//!
//! The whole ontology is a [`UniverseConfig`], which deserializes from TOML:
//!
//! ```toml
//! [[elements]]
//! name = "instrument"
//! key = { name = "name", kind = "str" }
//!
//! [[elements]]
//! name = "detector"
//! key = { name = "id", kind = "int" }
//! requires = ["instrument"]
//! ```

use serde::{Deserialize, Serialize};

use crate::core::types::{FieldKind, KeyKind};

/// Names of the columns holding a temporal element's interval.
pub const DATETIME_BEGIN: &str = "datetime_begin";
/// See [`DATETIME_BEGIN`].
pub const DATETIME_END: &str = "datetime_end";

/// The primary key field of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyField {
    /// Field name accepted as an alias of the element name in record input.
    pub name: String,
    /// Key value kind.
    pub kind: KeyKind,
}

impl KeyField {
    /// A string key named `name`.
    pub fn string() -> Self {
        Self {
            name: "name".into(),
            kind: KeyKind::Str,
        }
    }

    /// An integer key named `id`.
    pub fn integer() -> Self {
        Self {
            name: "id".into(),
            kind: KeyKind::Int,
        }
    }
}

impl Default for KeyField {
    fn default() -> Self {
        Self::string()
    }
}

/// A non-key field stored in an element's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

impl MetadataField {
    /// A nullable metadata field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }
}

/// How an element participates in time-based joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRole {
    /// Records describe an observation; `datetime_begin` is its instant.
    Observation,
    /// Records describe a validity interval `[datetime_begin, datetime_end)`.
    Validity,
}

fn default_true() -> bool {
    true
}

/// One named coordinate axis of the universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionElement {
    pub name: String,
    #[serde(default)]
    pub key: KeyField,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub implies: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
    /// Whether records of this element are stored in their own table.
    #[serde(default = "default_true")]
    pub has_table: bool,
    #[serde(default)]
    pub temporal: Option<TemporalRole>,
    /// Whether records have sky-pixel overlaps for spatial joins.
    #[serde(default)]
    pub spatial: bool,
}

impl DimensionElement {
    /// Create an element with a string key and no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyField::string(),
            requires: Vec::new(),
            implies: Vec::new(),
            metadata: Vec::new(),
            has_table: true,
            temporal: None,
            spatial: false,
        }
    }

    /// Use an integer `id` key.
    pub fn with_integer_key(mut self) -> Self {
        self.key = KeyField::integer();
        self
    }

    /// Add required dependencies.
    pub fn requires(mut self, names: &[&str]) -> Self {
        self.requires.extend(names.iter().map(|s| s.to_string()));
        self
    }

    /// Add implied dependencies.
    pub fn implies(mut self, names: &[&str]) -> Self {
        self.implies.extend(names.iter().map(|s| s.to_string()));
        self
    }

    /// Add a nullable metadata field.
    pub fn with_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.metadata.push(MetadataField::new(name, kind));
        self
    }

    /// Mark the element as having no table of its own.
    pub fn without_table(mut self) -> Self {
        self.has_table = false;
        self
    }

    /// Set the temporal role.
    pub fn with_temporal(mut self, role: TemporalRole) -> Self {
        self.temporal = Some(role);
        self
    }

    /// Mark the element as spatial.
    pub fn spatial(mut self) -> Self {
        self.spatial = true;
        self
    }

    /// Required then implied dependency names, in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.requires.iter().chain(self.implies.iter())
    }

    /// Columns that identify a record: required dependencies then the element itself.
    pub fn primary_key_names(&self) -> Vec<&str> {
        self.requires
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .collect()
    }

    /// Map an input field name to its column name.
    ///
    /// The key field alias (`name` or `id`) maps to the element name.
    pub fn canonical_field<'a>(&'a self, field: &'a str) -> &'a str {
        if field == self.key.name {
            &self.name
        } else {
            field
        }
    }

    /// Check whether records carry a field (link, key, metadata, or time bound).
    pub fn has_field(&self, field: &str) -> bool {
        let field = self.canonical_field(field);
        field == self.name
            || self.dependencies().any(|d| d == field)
            || self.metadata.iter().any(|m| m.name == field)
            || (self.temporal.is_some() && (field == DATETIME_BEGIN || field == DATETIME_END))
    }
}

/// One dimension packed by a [`PackerSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackedDimension {
    /// Dimension whose (integer) value is packed.
    pub dimension: String,
    /// Field of the fixed element's record holding the exclusive upper bound.
    pub max_field: String,
}

/// A named, reversible integer encoding of part of a data id.
///
/// The fixed element's value is held constant; the packed dimensions are
/// combined as mixed-radix digits, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackerSpec {
    pub name: String,
    pub fixed: String,
    pub packed: Vec<PackedDimension>,
}

/// The full, serializable description of a dimension universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniverseConfig {
    #[serde(default)]
    pub version: u32,
    pub elements: Vec<DimensionElement>,
    #[serde(default)]
    pub packers: Vec<PackerSpec>,
}

impl UniverseConfig {
    /// Parse a universe description from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The built-in ontology for instrument and sky-map data.
    ///
    /// Instrument side: `instrument`, `physical_filter` (implies
    /// `abstract_filter`), `detector`, `visit`, `exposure` (implies `visit`),
    /// and `calibration_label` validity ranges. Sky side: `skymap`, `tract`,
    /// `patch`.
    pub fn observational() -> Self {
        use FieldKind::{Bytes, Float, Int, Str};

        let elements = vec![
            DimensionElement::new("instrument")
                .with_field("visit_max", Int)
                .with_field("exposure_max", Int)
                .with_field("detector_max", Int)
                .with_field("class_name", Str),
            DimensionElement::new("abstract_filter").without_table(),
            DimensionElement::new("physical_filter")
                .requires(&["instrument"])
                .implies(&["abstract_filter"]),
            DimensionElement::new("detector")
                .with_integer_key()
                .requires(&["instrument"])
                .with_field("full_name", Str)
                .with_field("name_in_raft", Str)
                .with_field("raft", Str)
                .with_field("purpose", Str),
            DimensionElement::new("visit")
                .with_integer_key()
                .requires(&["instrument"])
                .implies(&["physical_filter"])
                .with_field("name", Str)
                .with_field("exposure_time", Float)
                .with_field("seeing", Float)
                .with_temporal(TemporalRole::Observation)
                .spatial(),
            DimensionElement::new("exposure")
                .with_integer_key()
                .requires(&["instrument"])
                .implies(&["visit", "physical_filter"])
                .with_field("name", Str)
                .with_field("exposure_time", Float)
                .with_field("dark_time", Float)
                .with_field("observation_type", Str)
                .with_temporal(TemporalRole::Observation),
            DimensionElement::new("calibration_label")
                .requires(&["instrument"])
                .with_temporal(TemporalRole::Validity),
            DimensionElement::new("skymap")
                .with_field("hash", Bytes)
                .with_field("tract_max", Int)
                .with_field("patch_nx_max", Int)
                .with_field("patch_ny_max", Int),
            DimensionElement::new("tract")
                .with_integer_key()
                .requires(&["skymap"])
                .spatial(),
            DimensionElement::new("patch")
                .with_integer_key()
                .requires(&["skymap", "tract"])
                .with_field("cell_x", Int)
                .with_field("cell_y", Int)
                .spatial(),
        ];

        let packers = vec![
            PackerSpec {
                name: "visit_detector".into(),
                fixed: "instrument".into(),
                packed: vec![
                    PackedDimension {
                        dimension: "visit".into(),
                        max_field: "visit_max".into(),
                    },
                    PackedDimension {
                        dimension: "detector".into(),
                        max_field: "detector_max".into(),
                    },
                ],
            },
            PackerSpec {
                name: "exposure_detector".into(),
                fixed: "instrument".into(),
                packed: vec![
                    PackedDimension {
                        dimension: "exposure".into(),
                        max_field: "exposure_max".into(),
                    },
                    PackedDimension {
                        dimension: "detector".into(),
                        max_field: "detector_max".into(),
                    },
                ],
            },
        ];

        Self {
            version: 0,
            elements,
            packers,
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self::observational()
    }
}
