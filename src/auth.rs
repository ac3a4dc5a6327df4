//! Row-level authorization filters.
//!
//! Grants live in an `auth` table with one row per `(account_id, resource,
//! action)`. A viewer may see rows of a resource if they hold a `view` or
//! `edit` grant on it. Rows that fail the check are simply not returned, so
//! callers can't tell an unauthorized row from a missing one.

use crate::{
    filter::QueryFilter,
    query::{Predicate, Query},
    value::Value,
};
use derive_more::{Display, From};
use std::sync::Arc;

/// Table holding authorization grants.
pub const AUTH_TABLE: &str = "auth";

/// Actions that grant read access.
pub const READ_ACTIONS: [&str; 2] = ["view", "edit"];

/// The account on whose behalf a request is resolved.
#[derive(Clone, Copy, Debug, Display, From, PartialEq, Eq, Hash)]
pub struct ViewerId(pub i64);

/// Which grants a field requires.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AuthPolicy {
    /// The resource the viewer needs a grant on.
    pub resource: String,

    /// If set, grants are per owner: a row is visible only if the value of
    /// this column appears in one of the viewer's grants for the resource.
    /// Otherwise any grant on the resource makes every row visible.
    pub owner_key: Option<String>,
}

impl AuthPolicy {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            owner_key: None,
        }
    }

    #[must_use]
    pub fn owned_by(self, owner_key: impl Into<String>) -> Self {
        Self {
            owner_key: Some(owner_key.into()),
            ..self
        }
    }
}

/// The viewer's read grants on `resource`.
fn grants(viewer: ViewerId, resource: &str) -> Query {
    Query::select(AUTH_TABLE)
        .filter(Predicate::Eq {
            column: "account_id".into(),
            value: Value::Int(viewer.0),
        })
        .filter(Predicate::Eq {
            column: "resource".into(),
            value: resource.into(),
        })
        .filter(Predicate::In {
            column: "action".into(),
            values: READ_ACTIONS.iter().map(|&action| action.into()).collect(),
        })
}

/// Build the row filter enforcing `policy` for `viewer`, or `None` if the
/// field is unrestricted.
pub fn authorize(viewer: ViewerId, policy: Option<&AuthPolicy>) -> Option<QueryFilter> {
    let policy = policy?;

    let predicate = match &policy.owner_key {
        Some(owner_key) => Predicate::InSubquery {
            column: owner_key.clone(),
            subquery: Box::new(grants(viewer, &policy.resource).column(owner_key.as_str())),
        },
        None => Predicate::Exists(Box::new(grants(viewer, &policy.resource))),
    };

    Some(Arc::new(move |query: Query| query.filter(predicate.clone())))
}
