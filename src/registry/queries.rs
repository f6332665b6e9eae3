//! registry::queries
//!
//! Dimension and dataset queries.

use std::collections::{BTreeMap, VecDeque};

use super::{Registry, RegistryError};
use crate::core::datasets::DatasetRef;
use crate::core::dimensions::{DataCoordinate, RawDataId};
use crate::core::types::{DatasetId, FieldValue};
use crate::query::{QueryBuilder, QueryPlan, QuerySpec};

type RowMapper<'r, T> =
    Box<dyn Fn(&'r Registry, &QueryPlan, Vec<FieldValue>) -> Result<T, RegistryError> + 'r>;

/// Lazily fetched query results.
///
/// Rows are read one page at a time in output order, each page resuming
/// after the last row of the previous one; dropping the iterator stops the
/// scan. Once an error is yielded the iterator is finished.
pub struct QueryRows<'r, T> {
    registry: &'r Registry,
    plan: QueryPlan,
    page: VecDeque<Vec<FieldValue>>,
    last: Option<Vec<FieldValue>>,
    fetched: usize,
    exhausted: bool,
    map: RowMapper<'r, T>,
}

impl<'r, T> QueryRows<'r, T> {
    fn new(registry: &'r Registry, plan: QueryPlan, map: RowMapper<'r, T>) -> Self {
        tracing::trace!(sql = %plan.sql, "planned query");
        Self {
            registry,
            plan,
            page: VecDeque::new(),
            last: None,
            fetched: 0,
            exhausted: false,
            map,
        }
    }

    /// The generated SQL.
    pub fn sql(&self) -> &str {
        &self.plan.sql
    }

    fn fetch_page(&mut self) -> Result<(), RegistryError> {
        let size = self.registry.page_size;
        let sql = self.plan.page_sql(self.last.is_some());
        let mut params = self.plan.params.clone();
        if let Some(last) = &self.last {
            params.extend(last.iter().cloned());
        }
        params.push(FieldValue::Int(size as i64));

        let rows = self.registry.db.query(&sql, &params, &self.plan.kinds)?;
        if rows.len() < size {
            self.exhausted = true;
        }
        self.fetched += rows.len();
        self.last = rows.last().cloned();
        self.page.extend(rows);
        Ok(())
    }
}

impl<'r, T> Iterator for QueryRows<'r, T> {
    type Item = Result<T, RegistryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let row = self.page.pop_front()?;
        let item = (self.map)(self.registry, &self.plan, row);
        if item.is_err() {
            self.exhausted = true;
            self.page.clear();
        }
        Some(item)
    }
}

impl<T> std::fmt::Debug for QueryRows<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRows")
            .field("sql", &self.plan.sql)
            .field("fetched", &self.fetched)
            .finish()
    }
}

impl Registry {
    /// Find the data ids satisfying a query.
    ///
    /// Each result is a coordinate on the graph of `spec.dimensions`, for
    /// which every dataset type in `spec.datasets` has a dataset in one of
    /// its collections and the predicate holds. Results are distinct and
    /// expanded when `spec.expand` is set. No matches is not an error.
    ///
    /// # Errors
    ///
    /// Planning errors (syntax, unknown identifiers) are returned here;
    /// errors while reading rows are yielded by the iterator.
    pub fn query_dimensions(
        &self,
        spec: &QuerySpec,
    ) -> Result<QueryRows<'_, DataCoordinate>, RegistryError> {
        let plan = QueryBuilder::new(self.db.as_ref(), &self.universe).dimensions(spec)?;
        let expand = spec.expand;
        Ok(QueryRows::new(
            self,
            plan,
            Box::new(move |registry: &Registry, plan: &QueryPlan, row: Vec<FieldValue>| {
                let coordinate = to_coordinate(plan, row)?;
                if expand {
                    registry.expand_data_id(&RawDataId::from(&coordinate), &plan.graph)
                } else {
                    Ok(coordinate)
                }
            }),
        ))
    }

    /// Find the datasets of a registered type matching a query.
    ///
    /// `spec.datasets` adds further dataset constraints; `spec.dimensions`
    /// may name extra dimensions (an exposure, say) that relate to the
    /// dataset's own through records or validity ranges. When several
    /// datasets match one data id (overlapping validity ranges across
    /// collections), all are returned.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownName`] if the dataset type is not registered
    /// - Planning errors as for [`Registry::query_dimensions`]
    pub fn query_datasets<S: AsRef<str>>(
        &self,
        dataset_type: &str,
        collections: &[S],
        spec: &QuerySpec,
    ) -> Result<QueryRows<'_, DatasetRef>, RegistryError> {
        let dataset_type = self.get_dataset_type(dataset_type)?;
        let mut spec = spec.clone();
        spec.datasets.insert(
            0,
            (
                dataset_type,
                collections.iter().map(|c| c.as_ref().to_string()).collect(),
            ),
        );

        let plan = QueryBuilder::new(self.db.as_ref(), &self.universe).datasets(&spec, 0)?;
        Ok(QueryRows::new(
            self,
            plan,
            Box::new(|registry: &Registry, _: &QueryPlan, row: Vec<FieldValue>| {
                let id = row
                    .first()
                    .and_then(FieldValue::as_int)
                    .map(DatasetId::new)
                    .ok_or_else(|| RegistryError::Lookup("query returned no dataset id".into()))?;
                registry
                    .get_dataset(id)?
                    .ok_or_else(|| RegistryError::Lookup(format!("dataset {} vanished", id)))
            }),
        ))
    }
}

fn to_coordinate(plan: &QueryPlan, row: Vec<FieldValue>) -> Result<DataCoordinate, RegistryError> {
    let mut values = BTreeMap::new();
    for (name, value) in plan.columns.iter().zip(row) {
        let value = value.to_data_value().ok_or_else(|| {
            RegistryError::Lookup(format!("query returned no value for '{}'", name))
        })?;
        values.insert(name.clone(), value);
    }
    Ok(DataCoordinate::from_parts(plan.graph.clone(), values)?)
}
