//! Composing query transformers into an executable [`Query`].

use crate::{
    query::{Predicate, Query},
    value::Value,
};
use std::fmt::{self, Debug, Formatter};
use std::iter;
use std::sync::Arc;

/// A query transformer. Each filter receives the query built so far and
/// returns a (usually narrower) query.
pub type QueryFilter = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Build a query against `table` by applying `filters` in order. Missing
/// filters are skipped, so callers can pass a fixed-shape list regardless of
/// which filters apply to a given field.
pub fn build(table: &str, filters: impl IntoIterator<Item = Option<QueryFilter>>) -> Query {
    filters
        .into_iter()
        .flatten()
        .fold(Query::select(table), |query, filter| filter(query))
}

/// `column IN (values)`
pub fn where_in(column: impl Into<String>, values: Vec<Value>) -> QueryFilter {
    let column = column.into();
    Arc::new(move |query: Query| {
        query.filter(Predicate::In {
            column: column.clone(),
            values: values.clone(),
        })
    })
}

/// `column = value`
pub fn where_eq(column: impl Into<String>, value: impl Into<Value>) -> QueryFilter {
    let column = column.into();
    let value = value.into();
    Arc::new(move |query: Query| {
        query.filter(Predicate::Eq {
            column: column.clone(),
            value: value.clone(),
        })
    })
}

/// `LIMIT limit OFFSET offset`
pub fn paginate(limit: u64, offset: u64) -> QueryFilter {
    Arc::new(move |query: Query| query.limit(limit).offset(offset))
}

/// The query builder owned by one loader. It carries the loader's table and
/// authorization filter; every query it builds has the authorization filter
/// applied last, after the caller's filters.
#[derive(Clone)]
pub struct FilterPipeline {
    table: String,
    auth: Option<QueryFilter>,
}

impl Debug for FilterPipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("table", &self.table)
            .field("auth", &self.auth.as_ref().map(|_| "<filter>"))
            .finish()
    }
}

impl FilterPipeline {
    /// A pipeline with no row restriction.
    pub fn new(table: impl Into<String>) -> Self {
        Self::with_auth(table, None)
    }

    /// A pipeline whose queries are all restricted by `auth`, if given.
    pub fn with_auth(table: impl Into<String>, auth: Option<QueryFilter>) -> Self {
        Self {
            table: table.into(),
            auth,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_restricted(&self) -> bool {
        self.auth.is_some()
    }

    pub fn build(&self, filters: impl IntoIterator<Item = Option<QueryFilter>>) -> Query {
        build(
            &self.table,
            filters.into_iter().chain(iter::once(self.auth.clone())),
        )
    }
}
