//! core::run
//!
//! Processing runs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::{validate_collection_name, TypeError};

/// A processing run: the provenance batch that created a set of datasets.
///
/// Every run is also a collection with the same name. `(id, origin)` is the
/// run's primary key, so runs created by independent registries never
/// collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub origin: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
}

impl Run {
    /// Describe a run that has not been stored yet.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_collection_name(&name)?;
        Ok(Self {
            id: 0,
            origin: 0,
            name,
            environment: None,
            pipeline: None,
        })
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    /// The `(id, origin)` primary key.
    pub fn key(&self) -> (i64, i64) {
        (self.id, self.origin)
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.origin, self.id)
    }
}
