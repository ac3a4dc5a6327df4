//! Batched, cached lookups of single rows by key ("belongs-to").

use crate::{
    adapter::{fetcher, Fetcher, PersistenceAdapter},
    batch::{BatchController, BatchFuture, BatchRules},
    data::{KeySet, ValueSet},
    error::Error,
    filter::{where_in, FilterPipeline},
    value::{Row, Value},
};
use futures::future::{self, BoxFuture, Either, FutureExt, TryJoinAll};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

pub(crate) type RowBatchFuture<V> = BoxFuture<'static, Result<ValueSet<V>, Error>>;
pub(crate) type RowBatcher<V> = Box<dyn Fn(KeySet<Value>) -> RowBatchFuture<V> + Send + Sync>;
pub(crate) type RowController<V> = BatchController<Value, V, Error, RowBatchFuture<V>, RowBatcher<V>>;

/// A pending lookup of one row.
pub type RowFuture = BatchFuture<
    Value,
    Option<Arc<Row>>,
    Error,
    RowBatchFuture<Option<Arc<Row>>>,
    RowBatcher<Option<Arc<Row>>>,
>;

/// Returned by [`KeyLoader::load`]: ready at once for cached keys,
/// otherwise waiting on a batch.
pub type LoadFuture = Either<future::Ready<Result<Option<Arc<Row>>, Error>>, RowFuture>;

type Cache = Arc<Mutex<HashMap<Value, Option<Arc<Row>>>>>;

/// Loads rows of one table by primary key.
///
/// Keys requested in the same batch window are fetched with a single
/// `primary_key IN (..)` query, and every key is fetched at most once for the
/// lifetime of the loader: resolved keys, including keys with no row, are
/// cached permanently. A failed batch caches nothing.
pub struct KeyLoader {
    pipeline: FilterPipeline,
    primary_key: String,
    cache: Cache,
    controller: RowController<Option<Arc<Row>>>,
}

impl KeyLoader {
    pub fn new<A: PersistenceAdapter>(
        adapter: Arc<A>,
        pipeline: FilterPipeline,
        primary_key: impl Into<String>,
        rules: BatchRules,
    ) -> Self {
        Self::with_fetcher(fetcher(adapter), pipeline, primary_key.into(), rules)
    }

    pub(crate) fn with_fetcher(
        fetch: Fetcher,
        pipeline: FilterPipeline,
        primary_key: String,
        rules: BatchRules,
    ) -> Self {
        let cache = Cache::default();

        let batcher: RowBatcher<Option<Arc<Row>>> = {
            let pipeline = pipeline.clone();
            let column = primary_key.clone();
            let cache = cache.clone();

            Box::new(move |keys: KeySet<Value>| {
                let query = pipeline.build([Some(where_in(&column, keys.keys().cloned().collect()))]);
                let fetch = fetch.clone();
                let column = column.clone();
                let cache = cache.clone();

                async move {
                    let rows = fetch(query).await?;

                    let mut by_key: HashMap<Value, Arc<Row>> = HashMap::with_capacity(rows.len());
                    for row in rows {
                        let key = match row.get(&column) {
                            Some(key) => key.clone(),
                            None => continue,
                        };
                        by_key.entry(key).or_insert_with(|| Arc::new(row));
                    }

                    let mut cache = cache.lock().unwrap();
                    Ok::<_, Error>(keys.into_values(|key| {
                        let row = by_key.get(key).cloned();
                        cache.insert(key.clone(), row.clone());
                        row
                    }))
                }
                .boxed()
            })
        };

        Self {
            controller: BatchController::new(rules, batcher),
            pipeline,
            primary_key,
            cache,
        }
    }

    pub fn table(&self) -> &str {
        self.pipeline.table()
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Load the row whose primary key is `key`. Resolves to `None` if there
    /// is no such row, or if the authorization filter excludes it.
    pub fn load(&self, key: impl Into<Value>) -> LoadFuture {
        let key = key.into();
        match self.cached(&key) {
            Some(row) => {
                trace!(table = self.table(), %key, "key served from cache");
                Either::Left(future::ready(Ok(row)))
            }
            None => Either::Right(self.controller.load(key)),
        }
    }

    /// Load several rows at once. Results are in the order of `keys`.
    pub fn load_many<K: Into<Value>>(&self, keys: impl IntoIterator<Item = K>) -> TryJoinAll<LoadFuture> {
        future::try_join_all(keys.into_iter().map(|key| self.load(key)))
    }

    /// The cached result for `key`: `None` if the key hasn't been resolved
    /// yet, `Some(None)` if it was resolved and has no row.
    pub fn cached(&self, key: &Value) -> Option<Option<Arc<Row>>> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    /// Seed the cache with a row obtained some other way, so later loads of
    /// its key don't hit the store. Rows without the primary key column are
    /// ignored.
    ///
    /// Only prime rows that were read through this loader's authorization
    /// filter.
    pub fn prime(&self, row: Arc<Row>) {
        if let Some(key) = row.get(&self.primary_key).cloned() {
            self.cache.lock().unwrap().entry(key).or_insert(Some(row));
        }
    }
}
