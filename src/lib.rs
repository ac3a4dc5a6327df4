//! Tableloader is a request-scoped implementation of the
//! [dataloader pattern](https://github.com/graphql/dataloader) for graph
//! query APIs backed by a relational store. It turns the many small row
//! lookups made while resolving a query tree into a few batched `IN (..)`
//! queries, deduplicates keys, caches rows for the lifetime of a request, and
//! applies a row-level authorization filter to every query it issues.
//!
//! ## Overview
//!
//! Suppose a list of campaigns is being resolved, and every campaign has an
//! `account` field pointing at a row of the `accounts` table. Resolving each
//! field on its own would issue one query per campaign. Instead, each field
//! asks a loader for its key, and the loader collects every key requested
//! while the current resolution pass runs, then issues a single query for
//! all of them:
//!
//! ```
//! use std::sync::Arc;
//! use futures::{executor::block_on, future::try_join_all};
//! use tableloader::{
//!     resolve, row, BatchRules, BindingKind, FieldBinding, LoaderScope, MemoryAdapter,
//!     PageArgs, Value, ViewerId,
//! };
//!
//! let db = Arc::new(MemoryAdapter::new());
//! db.insert("accounts", (1..=3).map(|id| row([("id", Value::from(id))])));
//! db.insert("campaigns", [
//!     row([("id", Value::from(7)), ("account_id", Value::from(1))]),
//!     row([("id", Value::from(8)), ("account_id", Value::from(2))]),
//!     row([("id", Value::from(9)), ("account_id", Value::from(1))]),
//! ]);
//!
//! // Field wiring is static and built once.
//! let campaigns = FieldBinding::new("campaigns", BindingKind::Table);
//! let account = FieldBinding::new("account", BindingKind::OneToOne).table("accounts");
//!
//! // Loaders are not: every request gets its own scope.
//! let scope = LoaderScope::new(db.clone(), ViewerId(1), BatchRules::default());
//!
//! let listed = block_on(resolve(&scope, &campaigns, None, PageArgs::default()))?;
//! let accounts = block_on(try_join_all(listed.as_many().iter().map(|campaign| {
//!     resolve(&scope, &account, Some(&**campaign), PageArgs::default())
//! })))?;
//!
//! assert_eq!(accounts.len(), 3);
//!
//! // Three campaigns, two distinct accounts, one query.
//! assert_eq!(db.executed_on("accounts").len(), 1);
//! # Ok::<(), tableloader::Error>(())
//! ```
//!
//! ## Components
//!
//! - A [`FieldBinding`] says where a field's rows come from: a table, its
//!   key columns, a [`BindingKind`] and an optional [`AuthPolicy`].
//! - A [`LoaderScope`] owns every loader created while resolving one
//!   request. Fields reading the same table under the same policy share
//!   loaders, and with them batches and cached rows.
//! - A [`KeyLoader`] fetches single rows by primary key and caches them
//!   (including misses) for the lifetime of the scope.
//! - A [`GroupBatcher`] fetches the rows pointing back at a parent through a
//!   foreign key, and partitions them per parent. It does not cache.
//! - A [`FilterPipeline`] composes [`QueryFilter`]s into a [`Query`], always
//!   ending with the authorization filter.
//! - A [`PersistenceAdapter`] executes queries. [`MemoryAdapter`] is an
//!   in-memory store for tests.
//!
//! ## Design notes
//!
//! ### Poll-driven batching
//!
//! All of the asynchronous work is driven by polling the futures returned
//! from the loaders; nothing is spawned and no runtime is required. Each
//! loader hands its keys to a [`BatchController`], which adds them to the
//! currently open batch as soon as they are requested. The first future to
//! be polled becomes the driver of the batch: it waits out the batch
//! [`Window`], runs the fetch, and wakes every other future once the values
//! are ready. If the driver is dropped, another waiting future takes over.
//!
//! With the default [`Window::Tick`], the driver yields to the executor once
//! before dispatching, so every lookup made by futures polled in the same
//! pass (all the branches of a `join_all`, for instance) lands in the same
//! batch. [`BatchRules::max_keys`] caps the size of a batch.
//!
//! ### `KeySet` and `ValueSet`
//!
//! The batch function receives a [`KeySet`] holding the unique keys of the
//! batch and returns a [`ValueSet`], which can only be built from that
//! `KeySet`. This guarantees that every requested key gets a value. Values
//! requested by more than one future are cloned for all but the last of
//! them; loaders deliver rows as `Arc<Row>`, so every caller of a key sees
//! the same row.
//!
//! ### Errors
//!
//! When a batch fails, every future waiting on it receives a clone of the
//! same [`Error`], nothing from the batch is cached, and the next lookup
//! opens a fresh batch.

mod adapter;
mod auth;
mod batch;
mod binding;
mod data;
mod error;
mod filter;
mod group;
mod key_loader;
mod query;
mod resolve;
mod scope;
mod test;
mod value;
mod wakerset;
mod window;

pub use adapter::{MemoryAdapter, MemoryError, PersistenceAdapter};
pub use auth::{authorize, AuthPolicy, ViewerId, AUTH_TABLE, READ_ACTIONS};
pub use batch::{BatchController, BatchFuture, BatchRules};
pub use binding::{BindingKind, Cardinality, FieldBinding};
pub use data::{KeySet, ValueSet};
pub use error::Error;
pub use filter::{build, paginate, where_eq, where_in, FilterPipeline, QueryFilter};
pub use group::{GroupBatcher, GroupFuture};
pub use key_loader::{KeyLoader, LoadFuture, RowFuture};
pub use query::{Predicate, Query, SelectColumn};
pub use resolve::{resolve, Resolved};
pub use scope::{LoaderScope, PageArgs, TableLoaders, DEFAULT_PAGE_LIMIT};
pub use value::{row, Row, Value};
pub use window::Window;
