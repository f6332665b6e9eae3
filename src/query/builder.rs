//! query::builder
//!
//! Join planning and SQL generation.
//!
//! # Joins
//!
//! The query graph is the closure of the requested dimensions, the dataset
//! types' dimensions, the data id keys, and every element the predicate
//! mentions. Each dimension is *provided* by one or more columns:
//!
//! - the tables of elements in the graph (their keys and implied links)
//! - one subquery per dataset type, selecting its required dimensions from
//!   datasets in the given collections
//! - sky-pixel overlap tables, when the graph has unrelated spatial elements
//!
//! Only *anchored* elements have their tables joined: required elements of
//! the graph, elements named by the query (result dimensions, dataset
//! dimensions, data id keys, predicate identifiers), and what those require.
//! An element reached only through an implied link adds nothing to the join,
//! so an exposure with no visit still matches a query over exposures.
//!
//! The canonical provider of a dimension is its first key column, falling
//! back to the first implied link. Every other provider is constrained equal
//! to it; two implied links (both nullable) only have to agree when both are
//! set. Validity-range elements join to unrelated observation elements with
//! `begin <= instant < end`, where a null bound is open.

use std::collections::{BTreeMap, BTreeSet};

use super::expr::{Expr, Identifier};
use super::parser::parse_expression;
use super::{QueryError, QuerySpec};
use crate::core::datasets::DatasetType;
use crate::core::dimensions::element::{DATETIME_BEGIN, DATETIME_END};
use crate::core::dimensions::{
    DimensionElement, DimensionGraph, DimensionUniverse, RawDataId, TemporalRole,
};
use crate::core::types::{FieldKind, FieldValue};
use crate::db::{quote, Database};
use crate::registry::tables::{overlap_table, DATASET, DATASET_COLLECTION, SKYPIX};

/// A planned query: one SQL statement and how to decode its rows.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// `SELECT DISTINCT ...` with `?` placeholders.
    pub sql: String,
    /// Output column aliases; no two rows agree on all of them.
    pub keys: Vec<String>,
    pub params: Vec<FieldValue>,
    /// Kinds of the output columns.
    pub kinds: Vec<FieldKind>,
    /// Dimension of each output column; empty for dataset queries.
    pub columns: Vec<String>,
    /// Graph of the results for dimension queries; the full query graph
    /// for dataset queries.
    pub graph: DimensionGraph,
}

impl QueryPlan {
    /// One page of results ordered by every output column.
    ///
    /// With `after_row`, the page resumes strictly after that row. The
    /// statement binds [`QueryPlan::params`], then the row's values, then the
    /// page size.
    pub fn page_sql(&self, after_row: bool) -> String {
        let order = self.keys.join(", ");
        let mut sql = format!("SELECT * FROM ({}) AS page", self.sql);
        if after_row {
            let placeholders = vec!["?"; self.keys.len()].join(", ");
            sql.push_str(&format!(" WHERE ({}) > ({})", order, placeholders));
        }
        sql.push_str(&format!(" ORDER BY {} LIMIT ?", order));
        sql
    }
}

/// Plans queries against one database.
pub struct QueryBuilder<'a> {
    db: &'a dyn Database,
    universe: &'a DimensionUniverse,
}

/// A column holding the value of one dimension.
#[derive(Debug, Clone)]
struct Provider {
    column: String,
    /// Implied links may be null; keys and dataset columns never are.
    nullable: bool,
}

type Providers = BTreeMap<String, Vec<Provider>>;

#[derive(Default)]
struct Joins {
    from: Vec<String>,
    from_params: Vec<FieldValue>,
    providers: Providers,
    /// Elements whose tables are in `from`.
    elements: BTreeSet<String>,
    dataset_ids: Vec<String>,
    conditions: Vec<String>,
    where_params: Vec<FieldValue>,
}

impl Joins {
    fn provide(&mut self, dimension: &str, column: String) {
        self.push_provider(dimension, column, false);
    }

    fn provide_link(&mut self, dimension: &str, column: String) {
        self.push_provider(dimension, column, true);
    }

    fn push_provider(&mut self, dimension: &str, column: String, nullable: bool) {
        self.providers
            .entry(dimension.to_string())
            .or_default()
            .push(Provider { column, nullable });
    }

    fn canonical(&self, dimension: &str) -> Option<String> {
        canonical(&self.providers, dimension).map(|p| p.column.clone())
    }
}

fn canonical<'p>(providers: &'p Providers, dimension: &str) -> Option<&'p Provider> {
    let columns = providers.get(dimension)?;
    columns
        .iter()
        .find(|p| !p.nullable)
        .or_else(|| columns.first())
}

impl<'a> QueryBuilder<'a> {
    pub fn new(db: &'a dyn Database, universe: &'a DimensionUniverse) -> Self {
        Self { db, universe }
    }

    /// Plan a query returning distinct values of the required dimensions of
    /// `spec.dimensions`.
    pub fn dimensions(&self, spec: &QuerySpec) -> Result<QueryPlan, QueryError> {
        self.plan(spec, None)
    }

    /// Plan a query returning the distinct ids of `spec.datasets[target]`.
    pub fn datasets(&self, spec: &QuerySpec, target: usize) -> Result<QueryPlan, QueryError> {
        if target >= spec.datasets.len() {
            return Err(QueryError::Invalid(format!(
                "dataset index {} out of range",
                target
            )));
        }
        self.plan(spec, Some(target))
    }

    fn plan(&self, spec: &QuerySpec, target: Option<usize>) -> Result<QueryPlan, QueryError> {
        let predicate = match spec.predicate.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(parse_expression(text)?),
            _ => None,
        };
        let graph = self.query_graph(spec, predicate.as_ref())?;
        let anchored = self.anchored(spec, &graph, predicate.as_ref());

        let mut joins = Joins::default();
        self.join_elements(&graph, &anchored, &mut joins);
        for (index, (dataset_type, collections)) in spec.datasets.iter().enumerate() {
            self.join_dataset(index, dataset_type, collections, &mut joins)?;
        }
        self.join_spatial(&graph, &mut joins)?;
        self.join_temporal(&graph, &mut joins)?;
        equate_providers(&graph, &mut joins)?;
        constrain_data_id(&spec.data_id, &mut joins)?;

        if let Some(expr) = &predicate {
            let providers = &joins.providers;
            let mut params = Vec::new();
            let sql = expr.to_sql(&|id: &Identifier| self.resolve(id, providers), &mut params)?;
            joins.conditions.push(sql);
            joins.where_params.extend(params);
        }

        let (select, kinds, columns, graph) = match target {
            Some(index) => (
                vec![joins.dataset_ids[index].clone()],
                vec![FieldKind::Int],
                Vec::new(),
                graph,
            ),
            None => {
                let result = self.universe.extract(&spec.dimensions)?;
                let mut select = Vec::new();
                let mut kinds = Vec::new();
                for element in result.required().iter().filter_map(|n| self.universe.element(n)) {
                    let column = joins.canonical(&element.name).ok_or_else(|| {
                        QueryError::Invalid(format!("nothing provides dimension '{}'", element.name))
                    })?;
                    joins.conditions.push(format!("{} IS NOT NULL", column));
                    select.push(column);
                    kinds.push(element.key.kind.into());
                }
                let columns = result.required().to_vec();
                (select, kinds, columns, result)
            }
        };

        let select = if select.is_empty() {
            vec!["1".to_string()]
        } else {
            select
        };
        let keys: Vec<String> = (0..select.len()).map(|i| quote(&format!("c{}", i))).collect();
        let outputs: Vec<String> = select
            .iter()
            .zip(&keys)
            .map(|(column, key)| format!("{} AS {}", column, key))
            .collect();
        let mut sql = format!("SELECT DISTINCT {}", outputs.join(", "));
        if !joins.from.is_empty() {
            sql.push_str(&format!(" FROM {}", joins.from.join(", ")));
        }
        if !joins.conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", joins.conditions.join(" AND ")));
        }

        let kinds = if kinds.is_empty() {
            vec![FieldKind::Int]
        } else {
            kinds
        };
        let mut params = joins.from_params;
        params.extend(joins.where_params);
        Ok(QueryPlan {
            sql,
            keys,
            params,
            kinds,
            columns,
            graph,
        })
    }

    fn query_graph(
        &self,
        spec: &QuerySpec,
        predicate: Option<&Expr>,
    ) -> Result<DimensionGraph, QueryError> {
        let mut names: Vec<String> = spec.dimensions.clone();
        for (dataset_type, _) in &spec.datasets {
            if dataset_type.dimensions().universe() != self.universe {
                return Err(QueryError::Invalid(format!(
                    "dataset type '{}' belongs to another universe",
                    dataset_type.name()
                )));
            }
            names.extend(dataset_type.dimensions().names().iter().cloned());
        }
        names.extend(spec.data_id.iter().map(|(k, _)| k.clone()));
        if let Some(expr) = predicate {
            for id in expr.identifiers() {
                let element = self
                    .universe
                    .element(id.element())
                    .ok_or_else(|| QueryError::UnknownIdentifier(id.to_string()))?;
                if id.table.is_some() && !element.has_field(&id.column) {
                    return Err(QueryError::UnknownIdentifier(id.to_string()));
                }
                names.push(element.name.clone());
            }
        }
        Ok(self.universe.extract(&names)?)
    }

    /// Elements whose tables must be joined.
    fn anchored(
        &self,
        spec: &QuerySpec,
        graph: &DimensionGraph,
        predicate: Option<&Expr>,
    ) -> BTreeSet<String> {
        let mut pending: Vec<String> = graph.required().to_vec();
        pending.extend(spec.dimensions.iter().cloned());
        for (dataset_type, _) in &spec.datasets {
            pending.extend(dataset_type.dimensions().required().iter().cloned());
        }
        pending.extend(spec.data_id.iter().map(|(k, _)| k.clone()));
        if let Some(expr) = predicate {
            pending.extend(expr.identifiers().iter().map(|id| id.element().to_string()));
        }

        let mut anchored = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !anchored.insert(name.clone()) {
                continue;
            }
            if let Some(element) = self.universe.element(&name) {
                pending.extend(element.requires.iter().cloned());
            }
        }
        anchored
    }

    fn column(&self, alias: &str, name: &str) -> String {
        format!("{}.{}", alias, quote(&self.db.shrink_name(name)))
    }

    fn table(&self, logical: &str) -> String {
        quote(&self.db.table_name(logical))
    }

    fn join_elements(&self, graph: &DimensionGraph, anchored: &BTreeSet<String>, joins: &mut Joins) {
        for element in graph.with_tables().filter(|e| anchored.contains(&e.name)) {
            let alias = quote(&element.name);
            joins
                .from
                .push(format!("{} AS {}", self.table(&element.name), alias));
            joins.elements.insert(element.name.clone());
            for column in element.primary_key_names() {
                joins.provide(column, self.column(&alias, column));
            }
            for column in &element.implies {
                joins.provide_link(column, self.column(&alias, column));
            }
        }
    }

    fn join_dataset(
        &self,
        index: usize,
        dataset_type: &DatasetType,
        collections: &[String],
        joins: &mut Joins,
    ) -> Result<(), QueryError> {
        if collections.is_empty() {
            return Err(QueryError::Invalid(format!(
                "no collections given for dataset type '{}'",
                dataset_type.name()
            )));
        }
        let alias = quote(&format!("dataset_{}", index));
        let required = dataset_type.dimensions().required();

        let mut select: Vec<String> = required.iter().map(|n| self.column("d", n)).collect();
        select.push(self.column("d", "dataset_id"));
        let placeholders = vec!["?"; collections.len()].join(", ");
        joins.from.push(format!(
            "(SELECT {} FROM {} AS d JOIN {} AS c ON {} = {} WHERE {} = ? AND {} IN ({})) AS {}",
            select.join(", "),
            self.table(DATASET),
            self.table(DATASET_COLLECTION),
            self.column("c", "dataset_id"),
            self.column("d", "dataset_id"),
            self.column("d", "dataset_type_name"),
            self.column("c", "collection"),
            placeholders,
            alias,
        ));
        joins.from_params.push(dataset_type.name().into());
        joins
            .from_params
            .extend(collections.iter().map(|c| FieldValue::from(c.as_str())));

        for name in required {
            joins.provide(name, self.column(&alias, name));
        }
        joins.dataset_ids.push(self.column(&alias, "dataset_id"));
        Ok(())
    }

    /// Join the overlap tables of unrelated spatial elements on common pixels.
    fn join_spatial(&self, graph: &DimensionGraph, joins: &mut Joins) -> Result<(), QueryError> {
        let spatial: Vec<&DimensionElement> = graph.spatial().filter(|e| e.has_table).collect();
        let leaves = self.leaves(&spatial)?;
        if leaves.len() < 2 {
            return Ok(());
        }

        let mut first: Option<String> = None;
        for element in leaves {
            let alias = quote(&format!("{}_{}", element.name, SKYPIX));
            joins.from.push(format!(
                "{} AS {}",
                self.table(&overlap_table(&element.name)),
                alias
            ));
            for column in element.primary_key_names() {
                joins.provide(column, self.column(&alias, column));
            }
            let pixel = self.column(&alias, SKYPIX);
            match &first {
                Some(first) => joins.conditions.push(format!("{} = {}", first, pixel)),
                None => first = Some(pixel),
            }
        }
        Ok(())
    }

    /// Join validity ranges to the instants of unrelated observations.
    fn join_temporal(&self, graph: &DimensionGraph, joins: &mut Joins) -> Result<(), QueryError> {
        let temporal: Vec<&DimensionElement> = graph
            .temporal()
            .filter(|e| joins.elements.contains(&e.name))
            .collect();
        let observations: Vec<&DimensionElement> = temporal
            .iter()
            .copied()
            .filter(|e| e.temporal == Some(TemporalRole::Observation))
            .collect();
        let observations = self.leaves(&observations)?;

        for validity in temporal
            .iter()
            .filter(|e| e.temporal == Some(TemporalRole::Validity))
        {
            for observation in &observations {
                if self.depends_on(validity, observation)? || self.depends_on(observation, validity)? {
                    continue;
                }
                let alias = quote(&validity.name);
                let begin = self.column(&alias, DATETIME_BEGIN);
                let end = self.column(&alias, DATETIME_END);
                let instant = self.column(&quote(&observation.name), DATETIME_BEGIN);
                joins.conditions.push(format!(
                    "({0} IS NULL OR {0} <= {2}) AND ({1} IS NULL OR {2} < {1})",
                    begin, end, instant
                ));
            }
        }
        Ok(())
    }

    /// Elements that no other element of `elements` depends on.
    fn leaves<'e>(
        &self,
        elements: &[&'e DimensionElement],
    ) -> Result<Vec<&'e DimensionElement>, QueryError> {
        let mut leaves = Vec::new();
        for element in elements {
            let mut covered = false;
            for other in elements {
                if self.depends_on(other, element)? {
                    covered = true;
                    break;
                }
            }
            if !covered {
                leaves.push(*element);
            }
        }
        Ok(leaves)
    }

    fn depends_on(
        &self,
        element: &DimensionElement,
        other: &DimensionElement,
    ) -> Result<bool, QueryError> {
        if element.name == other.name {
            return Ok(false);
        }
        Ok(self.universe.extract([&element.name])?.contains(&other.name))
    }

    fn resolve(&self, id: &Identifier, providers: &Providers) -> Result<String, QueryError> {
        match &id.table {
            None => canonical(providers, &id.column)
                .map(|p| p.column.clone())
                .ok_or_else(|| {
                    QueryError::Invalid(format!("nothing provides dimension '{}'", id.column))
                }),
            Some(table) => {
                let element = self
                    .universe
                    .element(table)
                    .filter(|e| e.has_table && e.has_field(&id.column))
                    .ok_or_else(|| QueryError::UnknownIdentifier(id.to_string()))?;
                Ok(self.column(&quote(&element.name), element.canonical_field(&id.column)))
            }
        }
    }
}

fn equate_providers(graph: &DimensionGraph, joins: &mut Joins) -> Result<(), QueryError> {
    for name in graph.names() {
        match joins.providers.get(name) {
            Some(columns) => {
                let Some(first) = canonical(&joins.providers, name) else {
                    continue;
                };
                for other in columns.iter().filter(|p| p.column != first.column) {
                    let condition = if first.nullable && other.nullable {
                        format!(
                            "({0} = {1} OR {0} IS NULL OR {1} IS NULL)",
                            first.column, other.column
                        )
                    } else {
                        format!("{} = {}", first.column, other.column)
                    };
                    joins.conditions.push(condition);
                }
            }
            None if graph.required().contains(name) => {
                return Err(QueryError::Invalid(format!(
                    "nothing provides dimension '{}'",
                    name
                )))
            }
            None => {}
        }
    }
    Ok(())
}

fn constrain_data_id(data_id: &RawDataId, joins: &mut Joins) -> Result<(), QueryError> {
    for (name, value) in data_id.iter() {
        let column = joins.canonical(name).ok_or_else(|| {
            QueryError::Invalid(format!("nothing provides dimension '{}'", name))
        })?;
        joins.conditions.push(format!("{} = ?", column));
        joins.where_params.push(value.clone().into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DatabaseDescriptor;
    use crate::core::dimensions::RawDataId;
    use crate::db;

    fn setup() -> (Box<dyn Database>, DimensionUniverse) {
        let universe = DimensionUniverse::observational().unwrap();
        let database = db::connect(&DatabaseDescriptor::in_memory()).unwrap();
        database
            .declare_tables(&crate::registry::tables::catalog_tables(&universe), true)
            .unwrap();
        (database, universe)
    }

    fn raw_type(universe: &DimensionUniverse) -> DatasetType {
        DatasetType::new(
            "raw",
            universe.extract(["instrument", "exposure", "detector"]).unwrap(),
            "Exposure",
        )
        .unwrap()
    }

    #[test]
    fn plans_dataset_join() {
        let (database, universe) = setup();
        let spec = QuerySpec::new(["visit"])
            .with_dataset(&raw_type(&universe), ["run1", "run2"])
            .with_predicate("visit = 10");
        let plan = QueryBuilder::new(database.as_ref(), &universe)
            .dimensions(&spec)
            .unwrap();

        assert_eq!(plan.columns, vec!["instrument", "visit"]);
        assert!(plan.sql.starts_with("SELECT DISTINCT"));
        assert!(plan.sql.contains("\"dataset_0\""));
        // type name, two collections, predicate literal
        assert_eq!(plan.params.len(), 4);
        assert_eq!(plan.params[0], FieldValue::from("raw"));

        // the statement must be valid against the catalog schema
        database.query(&plan.sql, &plan.params, &plan.kinds).unwrap();
    }

    #[test]
    fn pages_resume_after_last_row() {
        let (database, universe) = setup();
        let rows: Vec<db::Row> = ["CamA", "CamB", "CamC"]
            .iter()
            .map(|name| [("name".to_string(), FieldValue::from(*name))].into_iter().collect())
            .collect();
        database.insert("instrument", &rows).unwrap();

        let plan = QueryBuilder::new(database.as_ref(), &universe)
            .dimensions(&QuerySpec::new(["instrument"]))
            .unwrap();
        assert_eq!(plan.keys, vec!["\"c0\""]);

        let mut params = plan.params.clone();
        params.push(FieldValue::Int(2));
        let first = database.query(&plan.page_sql(false), &params, &plan.kinds).unwrap();
        assert_eq!(first.len(), 2);

        let mut params = plan.params.clone();
        params.extend(first[1].iter().cloned());
        params.push(FieldValue::Int(2));
        let second = database.query(&plan.page_sql(true), &params, &plan.kinds).unwrap();
        assert_eq!(second, vec![vec![FieldValue::from("CamC")]]);
    }

    #[test]
    fn temporal_join_uses_most_specific_observation() {
        let (database, universe) = setup();
        let flat = DatasetType::new(
            "flat",
            universe
                .extract(["instrument", "detector", "physical_filter", "calibration_label"])
                .unwrap(),
            "Image",
        )
        .unwrap();
        let spec = QuerySpec::new(Vec::<String>::new())
            .with_dataset(&flat, ["calibs"])
            .with_data_id(RawDataId::new().with("exposure", 100).with("instrument", "Cam"));
        let plan = QueryBuilder::new(database.as_ref(), &universe)
            .datasets(&spec, 0)
            .unwrap();

        assert!(plan.sql.contains("\"exposure\".\"datetime_begin\""));
        assert!(!plan.sql.contains("\"visit\".\"datetime_begin\""));
        assert_eq!(plan.kinds, vec![FieldKind::Int]);
        database.query(&plan.sql, &plan.params, &plan.kinds).unwrap();
    }

    #[test]
    fn spatial_join_between_families() {
        let (database, universe) = setup();
        let spec = QuerySpec::new(["visit", "detector", "patch"]);
        let plan = QueryBuilder::new(database.as_ref(), &universe)
            .dimensions(&spec)
            .unwrap();

        assert!(plan.sql.contains("\"visit_skypix\""));
        assert!(plan.sql.contains("\"patch_skypix\""));
        assert!(!plan.sql.contains("\"tract_skypix\""));
        let rows = database.query(&plan.sql, &plan.params, &plan.kinds).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn unknown_identifiers_rejected() {
        let (database, universe) = setup();
        let builder = QueryBuilder::new(database.as_ref(), &universe);

        let spec = QuerySpec::new(["visit"]).with_predicate("nebula = 3");
        assert_eq!(
            builder.dimensions(&spec).unwrap_err(),
            QueryError::UnknownIdentifier("nebula".into())
        );

        let spec = QuerySpec::new(["visit"]).with_predicate("visit.nebula = 3");
        assert!(matches!(
            builder.dimensions(&spec),
            Err(QueryError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn empty_collection_list_rejected() {
        let (database, universe) = setup();
        let spec = QuerySpec::new(["visit"]).with_dataset(&raw_type(&universe), Vec::<String>::new());
        assert!(matches!(
            QueryBuilder::new(database.as_ref(), &universe).dimensions(&spec),
            Err(QueryError::Invalid(_))
        ));
    }

    #[test]
    fn blank_predicate_is_ignored() {
        let (database, universe) = setup();
        let spec = QuerySpec::new(["instrument"]).with_predicate("   ");
        let plan = QueryBuilder::new(database.as_ref(), &universe)
            .dimensions(&spec)
            .unwrap();
        assert!(plan.params.is_empty());
        assert_eq!(plan.columns, vec!["instrument"]);
    }
}
