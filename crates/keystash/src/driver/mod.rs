use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keystash_wasm_utils::{
    KeystashFutureExt, PinnedFuture, PinnedStream, SendUnlessWasm, SyncUnlessWasm,
};

use crate::error::EngineError;
use crate::key::{Key, KeyRange, QueryDirection};
use crate::schema::{IndexSchema, StoreConfig};
use crate::{Error, Result};

#[cfg(target_arch = "wasm32")]
pub mod indexed_db;
pub mod memory;

/// A storage engine that can host versioned databases.
#[cfg_attr(target_arch = "wasm32", async_trait(? Send))]
#[async_trait]
pub trait Driver: SendUnlessWasm + SyncUnlessWasm + 'static {
    type Connection: Connection;

    /// Returns `false` if the runtime does not provide the storage engine at all.
    fn is_available(&self) -> bool;

    /// Opens the database `name` at `version`. If `version` is greater than the version on disk
    /// (0 for a database that doesn't exist yet) `on_upgrade` is invoked inside the version change
    /// transaction before the open succeeds.
    async fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Result<Self::Connection>;

    /// Lists the existing databases. Fails with `Error::FeatureUnsupported` if the engine cannot
    /// enumerate them.
    async fn databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Deletes the database `name`. Fails with `Error::BlockedDelete` while other connections to
    /// it are open.
    async fn delete_database(&self, name: &str) -> Result<()>;
}

pub trait Connection: SendUnlessWasm + SyncUnlessWasm + 'static {
    type Transaction: Transaction;

    fn name(&self) -> &str;
    fn version(&self) -> u32;
    fn store_names(&self) -> Vec<String>;

    /// Starts a transaction on `stores`. The transaction's terminal event is captured right away,
    /// before any request is issued on it.
    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Self::Transaction>;

    fn close(&self);
}

#[cfg_attr(target_arch = "wasm32", async_trait(? Send))]
#[async_trait]
pub trait Transaction: SendUnlessWasm + SyncUnlessWasm + 'static {
    type ObjectStore: ObjectStore;

    fn mode(&self) -> TransactionMode;
    fn object_store(&self, name: &str) -> Result<Self::ObjectStore>;
    fn abort(&self) -> Result<()>;

    /// Waits for the transaction to finish. Dropping a transaction without waiting for its
    /// outcome commits it once all of its requests completed.
    async fn outcome(self) -> TransactionOutcome;
}

/// An object store inside a running transaction. Requests are issued when the method is called
/// and complete in issue order.
pub trait ObjectStore: SendUnlessWasm + SyncUnlessWasm + 'static {
    type Index: Index;

    fn name(&self) -> String;
    fn index_names(&self) -> Vec<String>;
    fn index(&self, name: &str) -> Result<Self::Index>;

    fn add(&self, value: &Value, key: Option<&Key>) -> Request<Key>;
    fn put(&self, value: &Value, key: Option<&Key>) -> Request<Key>;
    fn get(&self, key: &Key) -> Request<Option<Value>>;
    fn get_all(&self, range: &KeyRange) -> Request<Vec<Value>>;
    fn delete(&self, range: &KeyRange) -> Request<()>;
    fn clear(&self) -> Request<()>;
    fn count(&self, range: &KeyRange) -> Request<u64>;

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor;
    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor;
}

pub trait Index: SendUnlessWasm + SyncUnlessWasm + 'static {
    fn name(&self) -> String;

    fn get(&self, key: &Key) -> Request<Option<Value>>;
    fn count(&self, range: &KeyRange) -> Request<u64>;

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor;
    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor;
}

/// The version change transaction handed to upgrade handlers. Everything happens synchronously
/// inside the upgrade event: write requests are issued but not awaited, a failing request aborts
/// the upgrade.
pub trait UpgradeTransaction {
    fn store_names(&self) -> Vec<String>;
    fn create_object_store(&self, name: &str, config: &StoreConfig) -> Result<()>;
    fn delete_object_store(&self, name: &str) -> Result<()>;

    fn index_names(&self, store: &str) -> Result<Vec<String>>;
    fn create_index(&self, store: &str, index: &IndexSchema) -> Result<()>;
    fn delete_index(&self, store: &str, index: &str) -> Result<()>;

    fn add(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()>;
    fn put(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()>;
    fn delete(&self, store: &str, range: &KeyRange) -> Result<()>;
    fn clear(&self, store: &str) -> Result<()>;
}

pub struct VersionChangeEvent<'a> {
    pub tx: &'a dyn UpgradeTransaction,
    pub old_version: u32,
    pub new_version: u32,
}

pub type UpgradeHandler = Box<dyn FnOnce(&VersionChangeEvent<'_>) -> Result<()> + Send>;

pub type TransactionOf<D> = <<D as Driver>::Connection as Connection>::Transaction;
pub type ObjectStoreOf<D> = <TransactionOf<D> as Transaction>::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Complete,
    Error(EngineError),
    Abort(EngineError),
}

impl TransactionOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            TransactionOutcome::Complete => Ok(()),
            TransactionOutcome::Error(err) => Err(Error::Transaction(err)),
            TransactionOutcome::Abort(err) => Err(Error::TransactionAbort(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u32,
}

/// One position of a cursor. `value` is `None` for key cursors.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCursorEntry {
    pub key: Key,
    pub primary_key: Key,
    pub value: Option<Value>,
}

pub type Cursor = PinnedStream<Result<RawCursorEntry>>;

/// A request that has been issued against an object store or index.
#[must_use = "requests are issued right away, but their result is only available when awaited"]
pub struct Request<T> {
    future: PinnedFuture<Result<T>>,
}

impl<T: SendUnlessWasm + 'static> Request<T> {
    pub fn new(future: impl Future<Output = Result<T>> + SendUnlessWasm + 'static) -> Self {
        Request {
            future: future.keystash_boxed(),
        }
    }

    pub fn ready(result: Result<T>) -> Self {
        Request::new(futures::future::ready(result))
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}
