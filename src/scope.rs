//! Per-request ownership of loaders.

use crate::{
    adapter::{fetcher, Fetcher, PersistenceAdapter},
    auth::{authorize, AuthPolicy, ViewerId},
    batch::BatchRules,
    binding::FieldBinding,
    error::Error,
    filter::{paginate, FilterPipeline},
    group::GroupBatcher,
    key_loader::KeyLoader,
    value::Row,
};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Page size used by table listings when the caller doesn't give one.
pub const DEFAULT_PAGE_LIMIT: u64 = 1000;

/// Pagination arguments of a root list field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageArgs {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl PageArgs {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// The effective limit. Zero counts as unset.
    pub fn limit(&self) -> u64 {
        self.limit
            .filter(|&limit| limit > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

/// Everything one scope uses to read a table under one authorization
/// policy: a keyed loader, a group batcher, and unbatched listings. All three
/// build their queries through the same [`FilterPipeline`].
pub struct TableLoaders {
    pipeline: FilterPipeline,
    fetch: Fetcher,
    keys: KeyLoader,
    groups: GroupBatcher,
}

impl Debug for TableLoaders {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLoaders")
            .field("pipeline", &self.pipeline)
            .field("primary_key", &self.keys.primary_key())
            .finish()
    }
}

impl TableLoaders {
    pub fn new<A: PersistenceAdapter>(
        adapter: Arc<A>,
        pipeline: FilterPipeline,
        primary_key: impl Into<String>,
        rules: BatchRules,
    ) -> Self {
        let fetch = fetcher(adapter);

        Self {
            keys: KeyLoader::with_fetcher(fetch.clone(), pipeline.clone(), primary_key.into(), rules),
            groups: GroupBatcher::with_fetcher(fetch.clone(), pipeline.clone(), rules),
            pipeline,
            fetch,
        }
    }

    pub fn table(&self) -> &str {
        self.pipeline.table()
    }

    pub fn keys(&self) -> &KeyLoader {
        &self.keys
    }

    pub fn groups(&self) -> &GroupBatcher {
        &self.groups
    }

    /// Read one page of the table. Rows returned here are primed into the
    /// keyed loader, so fields that look them up again later are served
    /// from the cache.
    pub async fn select(&self, page: PageArgs) -> Result<Vec<Arc<Row>>, Error> {
        let query = self
            .pipeline
            .build([Some(paginate(page.limit(), page.offset()))]);
        let rows = (self.fetch)(query).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let row = Arc::new(row);
                self.keys.prime(row.clone());
                row
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    table: String,
    policy: Option<AuthPolicy>,
}

/// The loaders belonging to one request.
///
/// A scope is created when a request starts and dropped when it ends. Within
/// it, every field that reads the same table under the same authorization
/// policy shares one set of loaders, and with them one batch window lineage
/// and one row cache. Nothing is shared between scopes.
pub struct LoaderScope<A> {
    adapter: Arc<A>,
    viewer: ViewerId,
    rules: BatchRules,
    tables: Mutex<HashMap<ScopeKey, Arc<TableLoaders>>>,
}

impl<A> Debug for LoaderScope<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderScope")
            .field("viewer", &self.viewer)
            .field("rules", &self.rules)
            .field("tables", &self.tables.lock().unwrap().len())
            .finish()
    }
}

impl<A: PersistenceAdapter> LoaderScope<A> {
    pub fn new(adapter: Arc<A>, viewer: ViewerId, rules: BatchRules) -> Self {
        debug!(%viewer, "opened loader scope");
        Self {
            adapter,
            viewer,
            rules,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn rules(&self) -> BatchRules {
        self.rules
    }

    /// The loaders for `table` under `policy`, created with `make` if this
    /// scope doesn't have them yet.
    pub fn for_table(
        &self,
        table: &str,
        policy: Option<&AuthPolicy>,
        make: impl FnOnce() -> TableLoaders,
    ) -> Arc<TableLoaders> {
        let key = ScopeKey {
            table: table.to_owned(),
            policy: policy.cloned(),
        };

        self.tables
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| {
                debug!(table, ?policy, "creating table loaders");
                Arc::new(make())
            })
            .clone()
    }

    /// The loaders serving `binding`, with the binding's authorization
    /// policy enforced for this scope's viewer.
    pub fn loaders(&self, binding: &FieldBinding) -> Arc<TableLoaders> {
        let loaders = self.for_table(&binding.table, binding.auth.as_ref(), || {
            let auth = authorize(self.viewer, binding.auth.as_ref());
            TableLoaders::new(
                self.adapter.clone(),
                FilterPipeline::with_auth(binding.table.as_str(), auth),
                binding.primary_key.as_str(),
                self.rules,
            )
        });

        if loaders.keys().primary_key() != binding.primary_key {
            warn!(
                field = %binding.field,
                table = %binding.table,
                expected = loaders.keys().primary_key(),
                found = %binding.primary_key,
                "field binding disagrees on primary key; using the first one seen"
            );
        }

        loaders
    }

    /// Number of distinct table loaders created so far.
    pub fn len(&self) -> usize {
        self.tables.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
