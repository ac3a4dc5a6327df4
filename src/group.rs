//! Batched lookups of row groups by foreign key ("has-many").

use crate::{
    adapter::{fetcher, Fetcher, PersistenceAdapter},
    batch::{BatchController, BatchFuture, BatchRules},
    data::KeySet,
    error::Error,
    filter::{where_in, FilterPipeline},
    key_loader::{RowBatchFuture, RowBatcher, RowController},
    value::{Row, Value},
};
use futures::future::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// A pending lookup of the rows belonging to one parent key.
pub type GroupFuture = BatchFuture<
    Value,
    Vec<Arc<Row>>,
    Error,
    RowBatchFuture<Vec<Arc<Row>>>,
    RowBatcher<Vec<Arc<Row>>>,
>;

/// Loads the rows of one table that point back at a parent through a
/// foreign key column.
///
/// Parent keys requested in the same batch window are fetched with a single
/// `foreign_key IN (..)` query, and the result is partitioned so each caller
/// receives exactly the rows whose foreign key equals its own parent key.
/// Nothing is cached between windows.
///
/// Each foreign key column gets its own batches, so two relations into the
/// same table never share a window.
pub struct GroupBatcher {
    fetch: Fetcher,
    pipeline: FilterPipeline,
    rules: BatchRules,
    lineages: Mutex<HashMap<String, RowController<Vec<Arc<Row>>>>>,
}

impl GroupBatcher {
    pub fn new<A: PersistenceAdapter>(adapter: Arc<A>, pipeline: FilterPipeline, rules: BatchRules) -> Self {
        Self::with_fetcher(fetcher(adapter), pipeline, rules)
    }

    pub(crate) fn with_fetcher(fetch: Fetcher, pipeline: FilterPipeline, rules: BatchRules) -> Self {
        Self {
            fetch,
            pipeline,
            rules,
            lineages: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &str {
        self.pipeline.table()
    }

    /// Load the rows whose `foreign_key` column equals `parent_key`. A parent
    /// with no rows (or whose rows are all excluded by the authorization
    /// filter) gets an empty list.
    pub fn load_group(&self, foreign_key: &str, parent_key: impl Into<Value>) -> GroupFuture {
        let mut lineages = self.lineages.lock().unwrap();
        let controller = lineages.entry(foreign_key.to_owned()).or_insert_with(|| {
            trace!(table = self.table(), foreign_key, "new group lineage");
            BatchController::new(self.rules, self.batcher(foreign_key))
        });

        controller.load(parent_key.into())
    }

    fn batcher(&self, foreign_key: &str) -> RowBatcher<Vec<Arc<Row>>> {
        let fetch = self.fetch.clone();
        let pipeline = self.pipeline.clone();
        let column = foreign_key.to_owned();

        Box::new(move |keys: KeySet<Value>| {
            let query = pipeline.build([Some(where_in(&column, keys.keys().cloned().collect()))]);
            let fetch = fetch.clone();
            let column = column.clone();

            async move {
                let rows = fetch(query).await?;

                let mut groups: HashMap<Value, Vec<Arc<Row>>> = HashMap::new();
                for row in rows {
                    let key = match row.get(&column) {
                        Some(key) => key.clone(),
                        None => continue,
                    };
                    groups.entry(key).or_default().push(Arc::new(row));
                }

                Ok::<_, Error>(keys.into_values(|key| groups.remove(key).unwrap_or_default()))
            }
            .boxed()
        })
    }
}
