//! Graphloader is a request-scoped implementation of the
//! [dataloader pattern](https://github.com/graphql/dataloader), built for
//! resolving graphs of relational entities (posts, comments, reactions, ...).
//! Every "load the parent / children / reactions of entity X" call issued
//! while serving one request is coalesced into as few storage round-trips as
//! possible, deduplicated by key, and cached for the rest of the request. The
//! call sites never see the batching.
//!
//! ## Overview
//!
//! Suppose your storage layer can fetch many users by id in one query. A
//! batch executor adapts that query to the loader API: it takes a [`KeySet`]
//! containing every (unique) key of one batch, and returns a [`ValueSet`]
//! pairing each of those keys with its value. The only way to build a
//! [`ValueSet`] is through a [`KeySet`] method, which guarantees that every
//! requested key gets exactly one value:
//!
//! ```
//! use graphloader::{ExecutorError, KeySet, OnDuplicate, ValueSet};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! async fn fetch_users(ids: Vec<u32>) -> Result<Vec<User>, ExecutorError> {
//!     Ok(ids
//!         .into_iter()
//!         .filter(|id| *id < 100)
//!         .map(|id| User { id, name: format!("user {}", id) })
//!         .collect())
//! }
//!
//! async fn users_by_id(ids: KeySet<u32>) -> Result<ValueSet<u32, Option<User>>, ExecutorError> {
//!     let users = fetch_users(ids.keys().copied().collect()).await?;
//!
//!     // Ids with no matching user resolve to `None`, not to an error.
//!     Ok(ids.values_from_rows(OnDuplicate::Ignore, users, |user| user.id))
//! }
//! ```
//!
//! Loaders live in a [`LoaderRegistry`], one per request. The transport
//! layer creates it with [`Scopes::on_request_start`] and discards it with
//! [`Scopes::on_request_end`]; everything in between asks the registry for a
//! loader by its [`LoaderIdentity`]. The first request for an identity
//! creates the loader; every later one gets the same loader, and so the same
//! cache.
//!
//! ```
//! use futures::{executor, future};
//! use graphloader::{batch_fn, ExecutorError, KeySet, LoaderIdentity, Scopes};
//!
//! let scopes = Scopes::default();
//! let scope = scopes.on_request_start();
//!
//! let loader = scope
//!     .get_or_create(LoaderIdentity::new("userNames"), || {
//!         batch_fn(|ids: KeySet<u32>| async move {
//!             Ok::<_, ExecutorError>(ids.into_values(|id| format!("user {}", id)))
//!         })
//!     })
//!     .unwrap();
//!
//! // Both keys are requested in the same turn, so they share one executor
//! // call.
//! let (a, b) = executor::block_on(future::join(loader.load(1), loader.load(2)));
//! assert_eq!(a.unwrap(), "user 1");
//! assert_eq!(b.unwrap(), "user 2");
//!
//! // `load_many` keeps the order of its keys.
//! let names = executor::block_on(loader.load_many(vec![2, 1])).unwrap();
//! assert_eq!(names, ["user 2", "user 1"]);
//!
//! scopes.on_request_end(scope);
//! ```
//!
//! ## Design notes
//!
//! ### Batch windows
//!
//! A batch opens when the first uncached key is requested, and keeps
//! collecting keys until its [`BatchWindow`] completes. The default window,
//! [`BatchWindow::Yield`], yields to the executor exactly once: every key
//! requested by a future polled in the same `join`, or by a task that runs
//! before the batch's future is polled again, lands in the batch. Awaiting a
//! load and then requesting another key always starts a new batch. Larger
//! windows ([`BatchWindow::Delay`]) coalesce across threads.
//!
//! ### Poll-driven design
//!
//! Nothing is spawned. The executor call is driven directly by polling the
//! [`LoadFuture`]s waiting on the batch, and only one of them (the "driver")
//! does the polling; the rest are woken when the batch settles, or when the
//! driver is dropped and one of them has to take over.
//!
//! ### Caching and failures
//!
//! A settled batch stays in the loader's cache, so loading one of its keys
//! again never calls the executor. A failed batch hands a clone of the same
//! [`ExecutorError`] to every waiter and is then forgotten; loading one of
//! its keys again starts a new batch.

mod config;
mod data;
mod error;
mod executor;
mod identity;
mod loader;
mod registry;
mod scope;
pub mod services;
pub mod storage;
mod wakerset;
mod window;

mod test;

pub use config::LoaderConfig;
pub use data::{Key, KeySet, OnDuplicate, ValueSet};
pub use error::{
    ExecutorError, IdentityCollisionError, NotFoundError, ResolveError, ResolveResult,
};
pub use executor::{batch_fn, BatchExecutor, BatchFn};
pub use identity::{LoaderIdentity, Scalar};
pub use loader::{KeyedLoader, LoadFuture};
pub use registry::LoaderRegistry;
pub use scope::{RequestScope, Scopes};
pub use window::BatchWindow;
