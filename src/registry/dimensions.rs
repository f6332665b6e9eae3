//! registry::dimensions
//!
//! Dimension records and data id expansion.

use std::collections::BTreeMap;

use super::tables::{overlap_table, SKYPIX};
use super::{Registry, RegistryError};
use crate::core::dimensions::{
    DataCoordinate, DimensionElement, DimensionGraph, DimensionRecord, Expansion, RawDataId,
    RawRecord,
};
use crate::core::types::{DataValue, FieldValue};
use crate::db::Row;

impl Registry {
    /// Insert records of a dimension element.
    ///
    /// Field names may use the element's key alias (`name` or `id`).
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownName`] if the element has no table
    /// - Invalid records (unknown fields, missing key values)
    /// - Duplicates and records whose parents do not exist surface as
    ///   backend integrity violations
    pub fn insert_dimension_data(
        &self,
        element: &str,
        records: &[RawRecord],
    ) -> Result<(), RegistryError> {
        let (element, rows) = self.record_rows(element, records)?;
        self.scope(|| {
            self.db.insert(&element.name, &rows)?;
            tracing::debug!(element = %element.name, count = rows.len(), "inserted dimension records");
            Ok(())
        })
    }

    /// Insert records of a dimension element, replacing existing records
    /// with the same key.
    pub fn replace_dimension_data(
        &self,
        element: &str,
        records: &[RawRecord],
    ) -> Result<(), RegistryError> {
        let (element, rows) = self.record_rows(element, records)?;
        self.scope(|| {
            self.db.replace(&element.name, &rows)?;
            tracing::debug!(element = %element.name, count = rows.len(), "replaced dimension records");
            Ok(())
        })
    }

    fn record_rows(
        &self,
        element: &str,
        records: &[RawRecord],
    ) -> Result<(DimensionElement, Vec<Row>), RegistryError> {
        let element = self.stored_element(element)?;
        let rows = records
            .iter()
            .map(|raw| Ok(DimensionRecord::new(&element, raw)?.fields().clone()))
            .collect::<Result<Vec<Row>, RegistryError>>()?;
        Ok((element, rows))
    }

    fn stored_element(&self, name: &str) -> Result<DimensionElement, RegistryError> {
        let element = self.universe.get(name)?;
        if !element.has_table {
            return Err(RegistryError::UnknownName(format!(
                "dimension element '{}' has no table",
                name
            )));
        }
        Ok(element.clone())
    }

    /// Expand a data id with implied values and dimension records.
    ///
    /// Records are fetched for every element of `graph` with a table; implied
    /// values come from the records that link to them.
    ///
    /// # Errors
    ///
    /// - Lookup-class errors if a required value or a record is missing
    /// - [`RegistryError::ConflictingDefinition`] if `data_id` gives an
    ///   implied value that disagrees with the stored records
    pub fn expand_data_id(
        &self,
        data_id: &RawDataId,
        graph: &DimensionGraph,
    ) -> Result<DataCoordinate, RegistryError> {
        let coordinate = DataCoordinate::standardize(data_id, graph)?;
        let mut known: BTreeMap<String, DataValue> = coordinate.values().clone();
        for name in graph.implied() {
            if let Some(value) = data_id.get(name) {
                known.insert(name.clone(), value.clone());
            }
        }

        let mut records = BTreeMap::new();
        loop {
            let mut progressed = false;
            for element in graph.with_tables() {
                if records.contains_key(&element.name) {
                    continue;
                }
                let key = element.primary_key_names();
                if !key.iter().all(|n| known.contains_key(*n)) {
                    continue;
                }

                let filter: Row = key
                    .iter()
                    .map(|n| (n.to_string(), FieldValue::from(known[*n].clone())))
                    .collect();
                let stored = self
                    .db
                    .fetch(&element.name, &filter)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        RegistryError::Lookup(format!(
                            "no '{}' record for {}",
                            element.name,
                            describe(&filter)
                        ))
                    })?;
                let record = DimensionRecord::from_stored(&element.name, stored);

                for link in element.implies.iter().filter(|l| graph.contains(l)) {
                    let Some(value) = record.link(link) else {
                        continue;
                    };
                    match known.get(link) {
                        Some(given) if given != &value => {
                            return Err(RegistryError::ConflictingDefinition(format!(
                                "data id gives {} = {} but the '{}' record says {}",
                                link, given, element.name, value
                            )))
                        }
                        Some(_) => {}
                        None => {
                            known.insert(link.clone(), value);
                        }
                    }
                }
                records.insert(element.name.clone(), record);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        let implied = graph
            .implied()
            .iter()
            .filter_map(|n| known.get(n).map(|v| (n.clone(), v.clone())))
            .collect();
        Ok(coordinate.with_expansion(Expansion { implied, records })?)
    }

    /// Record the sky pixels overlapping a spatial element's region.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownName`] if the element is not spatial
    /// - Lookup-class errors if `data_id` does not identify a record
    pub fn insert_skypix_overlaps(
        &self,
        element: &str,
        data_id: &RawDataId,
        pixels: &[i64],
    ) -> Result<(), RegistryError> {
        let element = self.stored_element(element)?;
        if !element.spatial {
            return Err(RegistryError::UnknownName(format!(
                "dimension element '{}' is not spatial",
                element.name
            )));
        }
        let graph = self.universe.extract([element.name.as_str()])?;
        let coordinate = DataCoordinate::standardize(data_id, &graph)?;

        let key: Row = element
            .primary_key_names()
            .into_iter()
            .filter_map(|n| {
                coordinate
                    .get(n)
                    .map(|v| (n.to_string(), FieldValue::from(v.clone())))
            })
            .collect();
        let rows: Vec<Row> = pixels
            .iter()
            .map(|pixel| {
                let mut values = key.clone();
                values.insert(SKYPIX.to_string(), (*pixel).into());
                values
            })
            .collect();

        self.scope(|| {
            self.db.replace(&overlap_table(&element.name), &rows)?;
            Ok(())
        })
    }
}

fn describe(values: &Row) -> String {
    values
        .iter()
        .map(|(k, v)| match v.to_data_value() {
            Some(v) => format!("{}={}", k, v),
            None => format!("{}=?", k),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
