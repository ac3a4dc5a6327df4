//! The error type shared by loaders and resolvers.

use crate::binding::BindingKind;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by loaders and field resolution.
///
/// A failed batch delivers the same error to every future waiting on it, so
/// this type is cheap to clone.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The persistence adapter failed while flushing a batch.
    #[error("fetching rows from `{table}` failed: {source}")]
    Fetch {
        table: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    /// A field binding is wired to a resolver it can't be served by.
    #[error("field `{field}` cannot be resolved as {kind}: {reason}")]
    Binding {
        field: String,
        kind: BindingKind,
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn fetch(table: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Fetch {
            table: table.into(),
            source: Arc::new(source),
        }
    }

    /// Whether this error came from the store rather than from wiring.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}
