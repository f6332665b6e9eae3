//! core::dimensions::record
//!
//! One row of a dimension element's table.

use std::collections::BTreeMap;

use super::element::{DimensionElement, DATETIME_BEGIN, DATETIME_END};
use super::DimensionError;
use crate::core::types::{DataValue, FieldKind, FieldValue, KeyKind, Timespan};

/// Field name to value, as supplied by callers.
pub type RawRecord = BTreeMap<String, FieldValue>;

/// A validated dimension record.
///
/// Field names are canonical: the element's key alias (`name` or `id`) is
/// stored under the element name itself, so a `detector` record has a
/// `detector` field rather than an `id` field.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRecord {
    element: String,
    fields: BTreeMap<String, FieldValue>,
}

impl DimensionRecord {
    /// Validate raw fields against an element definition.
    ///
    /// Undeclared fields are rejected and absent declared fields are null.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::UnknownField`] for undeclared fields
    /// - [`DimensionError::MissingValue`] if the key or a required link is null
    /// - [`DimensionError::WrongKind`] if the key has the wrong kind
    pub fn new(element: &DimensionElement, raw: &RawRecord) -> Result<Self, DimensionError> {
        let mut fields = BTreeMap::new();
        for (name, value) in raw {
            if !element.has_field(name) {
                return Err(DimensionError::UnknownField {
                    element: element.name.clone(),
                    field: name.clone(),
                });
            }
            fields.insert(element.canonical_field(name).to_string(), value.clone());
        }

        for name in element.primary_key_names() {
            match fields.get(name) {
                None | Some(FieldValue::Null) => {
                    return Err(DimensionError::MissingValue {
                        dimension: name.to_string(),
                        required: element.name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        let key_ok = match (element.key.kind, &fields[&element.name]) {
            (KeyKind::Int, FieldValue::Int(_)) => true,
            (KeyKind::Str, FieldValue::Str(_)) => true,
            _ => false,
        };
        if !key_ok {
            return Err(DimensionError::WrongKind {
                dimension: element.name.clone(),
                expected: element.key.kind,
            });
        }

        for field in &element.metadata {
            fields.entry(field.name.clone()).or_insert(FieldValue::Null);
        }
        for link in &element.implies {
            fields.entry(link.clone()).or_insert(FieldValue::Null);
        }
        if element.temporal.is_some() {
            for bound in [DATETIME_BEGIN, DATETIME_END] {
                fields.entry(bound.to_string()).or_insert(FieldValue::Null);
            }
        }

        Ok(Self {
            element: element.name.clone(),
            fields,
        })
    }

    /// Rebuild a record from trusted stored fields.
    pub(crate) fn from_stored(element: &str, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            element: element.to_string(),
            fields,
        }
    }

    /// Name of the element this record belongs to.
    pub fn element(&self) -> &str {
        &self.element
    }

    /// Value of a field; `name`/`id` aliases are not resolved here.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// All fields in name order.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// The element's own key value.
    pub fn key(&self) -> Option<DataValue> {
        self.fields.get(&self.element)?.to_data_value()
    }

    /// A linked dimension value (required or implied), if set.
    pub fn link(&self, dimension: &str) -> Option<DataValue> {
        self.fields.get(dimension)?.to_data_value()
    }

    /// The record's time interval, for temporal elements.
    pub fn timespan(&self) -> Option<Timespan> {
        let begin = self.fields.get(DATETIME_BEGIN)?.as_timestamp();
        let end = self.fields.get(DATETIME_END)?.as_timestamp();
        Some(Timespan::new(begin, end))
    }
}

/// Column kinds of an element's table, canonical names first.
///
/// `link_kind` gives the key kind of each linked element.
pub fn record_columns(
    element: &DimensionElement,
    link_kind: impl Fn(&str) -> Option<KeyKind>,
) -> Vec<(String, FieldKind, bool)> {
    let mut columns = Vec::new();
    for name in &element.requires {
        let kind = link_kind(name).unwrap_or(KeyKind::Str);
        columns.push((name.clone(), kind.into(), false));
    }
    columns.push((element.name.clone(), element.key.kind.into(), false));
    for name in &element.implies {
        let kind = link_kind(name).unwrap_or(KeyKind::Str);
        columns.push((name.clone(), kind.into(), true));
    }
    for field in &element.metadata {
        columns.push((field.name.clone(), field.kind, field.nullable));
    }
    if element.temporal.is_some() {
        columns.push((DATETIME_BEGIN.to_string(), FieldKind::Timestamp, true));
        columns.push((DATETIME_END.to_string(), FieldKind::Timestamp, true));
    }
    columns
}
