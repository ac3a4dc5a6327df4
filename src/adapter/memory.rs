//! In-memory instantiation of the [`PersistenceAdapter`] interface.
//!
//! This is a small table store that evaluates [`Query`] directly. It is
//! useful for testing loaders in isolation from an actual database: every
//! executed query is recorded, and failures can be injected per table.
//!
//! Rows come back in reverse insertion order, so callers that rely on the
//! store preserving key order get caught early.

use super::PersistenceAdapter;
use crate::{
    query::{Predicate, Query, SelectColumn},
    value::{Row, Value},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Errors returned by the in-memory store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("relation \"{0}\" does not exist")]
    NoSuchTable(String),

    #[error("subquery on \"{0}\" must select a single column")]
    SubqueryProjection(String),

    #[error("simulated failure querying \"{0}\"")]
    Injected(String),
}

/// The in-memory store.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    executed: Mutex<Vec<Query>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl MemoryAdapter {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` if it doesn't exist yet.
    pub fn create_table(&self, table: impl Into<String>) {
        self.tables
            .write()
            .unwrap()
            .entry(table.into())
            .or_default();
    }

    /// Append rows to `table`, creating it if necessary.
    pub fn insert(&self, table: impl Into<String>, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .unwrap()
            .entry(table.into())
            .or_default()
            .extend(rows);
    }

    /// Make the next `times` queries against `table` fail.
    pub fn fail_next(&self, table: impl Into<String>, times: usize) {
        *self
            .failures
            .lock()
            .unwrap()
            .entry(table.into())
            .or_default() += times;
    }

    /// Every query executed so far, in order, including failed ones.
    pub fn executed(&self) -> Vec<Query> {
        self.executed.lock().unwrap().clone()
    }

    /// Queries executed so far against `table`.
    pub fn executed_on(&self, table: &str) -> Vec<Query> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|query| query.table == table)
            .cloned()
            .collect()
    }

    /// Forget the recorded queries.
    pub fn clear_executed(&self) {
        self.executed.lock().unwrap().clear();
    }

    fn take_failure(&self, table: &str) -> bool {
        match self.failures.lock().unwrap().get_mut(table) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    type Error = MemoryError;

    async fn execute(&self, query: &Query) -> Result<Vec<Row>, MemoryError> {
        self.executed.lock().unwrap().push(query.clone());

        if self.take_failure(&query.table) {
            return Err(MemoryError::Injected(query.table.clone()));
        }

        let tables = self.tables.read().unwrap();
        select(&tables, query)
    }
}

/// A predicate with its subqueries already evaluated.
enum Matcher<'a> {
    Eq(&'a str, &'a Value),
    In(&'a str, HashSet<&'a Value>),
    InSet(&'a str, HashSet<Value>),
    Constant(bool),
}

impl Matcher<'_> {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq(column, value) => row.get(*column) == Some(*value),
            Self::In(column, values) => row.get(*column).map_or(false, |v| values.contains(v)),
            Self::InSet(column, values) => row.get(*column).map_or(false, |v| values.contains(v)),
            Self::Constant(matches) => *matches,
        }
    }
}

fn compile<'a>(
    tables: &HashMap<String, Vec<Row>>,
    predicate: &'a Predicate,
) -> Result<Matcher<'a>, MemoryError> {
    Ok(match predicate {
        Predicate::Eq { column, value } => Matcher::Eq(column, value),
        Predicate::In { column, values } => Matcher::In(column, values.iter().collect()),
        Predicate::InSubquery { column, subquery } => {
            let projected = match &subquery.projection {
                SelectColumn::Col(projected) => projected,
                SelectColumn::All => {
                    return Err(MemoryError::SubqueryProjection(subquery.table.clone()))
                }
            };
            let values = select(tables, subquery)?
                .into_iter()
                .filter_map(|mut row| row.remove(projected))
                .collect();
            Matcher::InSet(column, values)
        }
        Predicate::Exists(subquery) => {
            Matcher::Constant(!select(tables, &(**subquery).clone().limit(1))?.is_empty())
        }
    })
}

fn select(tables: &HashMap<String, Vec<Row>>, query: &Query) -> Result<Vec<Row>, MemoryError> {
    let rows = tables
        .get(&query.table)
        .ok_or_else(|| MemoryError::NoSuchTable(query.table.clone()))?;

    let matchers = query
        .predicates
        .iter()
        .map(|predicate| compile(tables, predicate))
        .collect::<Result<Vec<_>, _>>()?;

    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);

    Ok(rows
        .iter()
        .rev()
        .filter(|row| matchers.iter().all(|matcher| matcher.matches(row)))
        .skip(offset)
        .take(limit)
        .map(|row| match &query.projection {
            SelectColumn::All => row.clone(),
            SelectColumn::Col(column) => row
                .get_key_value(column)
                .map(|(k, v)| (k.clone(), v.clone()))
                .into_iter()
                .collect(),
        })
        .collect())
}
