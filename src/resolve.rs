//! Field resolution: dispatching a bound field to the right loader.

use crate::{
    adapter::PersistenceAdapter,
    binding::{BindingKind, FieldBinding},
    error::Error,
    scope::{LoaderScope, PageArgs},
    value::Row,
};
use std::sync::Arc;
use tracing::trace;

/// The rows a field resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    One(Option<Arc<Row>>),
    Many(Vec<Arc<Row>>),
}

impl Resolved {
    /// The resolved rows, whatever the field's cardinality.
    pub fn into_rows(self) -> Vec<Arc<Row>> {
        match self {
            Resolved::One(row) => row.into_iter().collect(),
            Resolved::Many(rows) => rows,
        }
    }

    pub fn as_one(&self) -> Option<&Arc<Row>> {
        match self {
            Resolved::One(row) => row.as_ref(),
            Resolved::Many(..) => None,
        }
    }

    pub fn as_many(&self) -> &[Arc<Row>] {
        match self {
            Resolved::One(..) => &[],
            Resolved::Many(rows) => rows,
        }
    }
}

/// Resolve `binding` for one parent row.
///
/// The lookup joins the batch window open when the returned future is first
/// polled, so resolving several fields concurrently (with `join_all`, for
/// example) folds their lookups into shared batches.
///
/// A parent without the relevant key column resolves to no rows without
/// touching the store. Root table fields ignore the parent and read a page
/// of the table.
pub async fn resolve<A: PersistenceAdapter>(
    scope: &LoaderScope<A>,
    binding: &FieldBinding,
    parent: Option<&Row>,
    page: PageArgs,
) -> Result<Resolved, Error> {
    let loaders = scope.loaders(binding);

    match binding.kind {
        BindingKind::OneToOne => {
            match parent.and_then(|parent| parent.get(&binding.foreign_key)) {
                Some(key) => loaders.keys().load(key.clone()).await.map(Resolved::One),
                None => {
                    trace!(field = %binding.field, "parent has no foreign key");
                    Ok(Resolved::One(None))
                }
            }
        }
        BindingKind::OneToMany => {
            match parent.and_then(|parent| parent.get(&binding.primary_key)) {
                Some(key) => loaders
                    .groups()
                    .load_group(&binding.foreign_key, key.clone())
                    .await
                    .map(Resolved::Many),
                None => {
                    trace!(field = %binding.field, "parent has no primary key");
                    Ok(Resolved::Many(Vec::new()))
                }
            }
        }
        BindingKind::Table => loaders.select(page).await.map(Resolved::Many),
    }
}
