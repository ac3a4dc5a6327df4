//! Interface to the store that executes queries.

use crate::{error::Error, query::Query, value::Row};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod memory;

pub use memory::{MemoryAdapter, MemoryError};

/// Executes composed queries against the store.
///
/// Implementations may return rows in any order. The adapter is shared by
/// every request; loaders never assume it holds per-request state.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync + 'static {
    /// Errors returned from queries.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run `query` and return the matching rows.
    async fn execute(&self, query: &Query) -> Result<Vec<Row>, Self::Error>;
}

/// Type-erased fetch function shared by the loaders of one table.
pub(crate) type Fetcher = Arc<dyn Fn(Query) -> BoxFuture<'static, Result<Vec<Row>, Error>> + Send + Sync>;

pub(crate) fn fetcher<A: PersistenceAdapter>(adapter: Arc<A>) -> Fetcher {
    Arc::new(move |query: Query| {
        let adapter = adapter.clone();
        async move {
            debug!(sql = %query, "executing query");
            match adapter.execute(&query).await {
                Ok(rows) => {
                    debug!(table = %query.table, rows = rows.len(), "query complete");
                    Ok(rows)
                }
                Err(err) => {
                    warn!(table = %query.table, error = %err, "query failed");
                    Err(Error::fetch(query.table, err))
                }
            }
        }
        .boxed()
    })
}
