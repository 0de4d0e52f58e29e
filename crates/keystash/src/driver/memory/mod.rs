use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use transaction::{MemoryIndex, MemoryObjectStore, MemoryTransaction};

use crate::driver::memory::state::DatabaseState;
use crate::driver::memory::upgrade::MemoryUpgradeTransaction;
use crate::driver::{
    Connection, DatabaseInfo, Driver, TransactionMode, UpgradeHandler, VersionChangeEvent,
};
use crate::error::EngineError;
use crate::{Error, Result};

mod state;
mod transaction;
mod upgrade;

/// An in-process storage engine with IndexedDB semantics. Clones share the same databases.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    databases: Mutex<BTreeMap<String, Arc<Mutex<DatabaseState>>>>,
    available: bool,
    can_enumerate_databases: bool,
    transactions_started: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_capabilities(true, true)
    }

    /// A driver that behaves like a runtime without a storage engine.
    pub fn unavailable() -> Self {
        Self::with_capabilities(false, true)
    }

    /// A driver that behaves like a runtime that cannot list its databases.
    pub fn without_database_enumeration() -> Self {
        Self::with_capabilities(true, false)
    }

    /// The number of transactions started on connections of this driver so far.
    pub fn transactions_started(&self) -> usize {
        self.inner.transactions_started.load(Ordering::SeqCst)
    }

    fn with_capabilities(available: bool, can_enumerate_databases: bool) -> Self {
        MemoryDriver {
            inner: Arc::new(DriverInner {
                databases: Default::default(),
                available,
                can_enumerate_databases,
                transactions_started: AtomicUsize::new(0),
            }),
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(? Send))]
#[async_trait]
impl Driver for MemoryDriver {
    type Connection = MemoryConnection;

    fn is_available(&self) -> bool {
        self.inner.available
    }

    async fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Result<Self::Connection> {
        if !self.inner.available {
            return Err(Error::StoreUnavailable);
        }
        if version == 0 {
            return Err(Error::Open(EngineError::new(
                "TypeError",
                "The version must be greater than 0",
            )));
        }

        let database = self
            .inner
            .databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DatabaseState::new(name))))
            .clone();

        let mut state = database.lock();

        if version < state.version {
            return Err(Error::Open(EngineError::version(format!(
                "The requested version ({version}) is less than the existing version ({})",
                state.version
            ))));
        }

        if version > state.version {
            let old_version = state.version;
            debug!(
                "Upgrading database {} from version {} to {}",
                state.name, old_version, version
            );

            if let Err(err) = upgrade(&mut state, old_version, version, on_upgrade) {
                warn!("Upgrade of database {name} failed: {err}");
                let discard = state.version == 0 && state.connections == 0;
                drop(state);
                if discard {
                    self.inner.databases.lock().remove(name);
                }
                return Err(Error::Open(EngineError::abort(err.to_string())));
            }

            state.version = version;
            info!("Database {name} is now at version {version}");
        }

        state.connections += 1;
        let version = state.version;
        drop(state);

        Ok(MemoryConnection {
            name: name.to_string(),
            version,
            database,
            driver: self.inner.clone(),
            closed: AtomicBool::new(false),
        })
    }

    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        if !self.inner.can_enumerate_databases {
            return Err(Error::FeatureUnsupported);
        }

        Ok(self
            .inner
            .databases
            .lock()
            .values()
            .filter_map(|database| {
                let state = database.lock();
                (state.version > 0).then(|| DatabaseInfo {
                    name: state.name.clone(),
                    version: state.version,
                })
            })
            .collect())
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let mut databases = self.inner.databases.lock();

        let blocked = databases
            .get(name)
            .map(|database| database.lock().connections > 0);

        match blocked {
            None => Ok(()),
            Some(true) => Err(Error::BlockedDelete(name.to_string())),
            Some(false) => {
                databases.remove(name);
                info!("Deleted database {name}");
                Ok(())
            }
        }
    }
}

fn upgrade(
    state: &mut DatabaseState,
    old_version: u32,
    new_version: u32,
    on_upgrade: Option<UpgradeHandler>,
) -> Result<()> {
    let Some(handler) = on_upgrade else {
        return Ok(());
    };

    let tx = MemoryUpgradeTransaction::new(state);
    let result = handler(&VersionChangeEvent {
        tx: &tx,
        old_version,
        new_version,
    })
    .and_then(|_| match tx.failure() {
        Some(err) => Err(Error::TransactionAbort(err)),
        None => Ok(()),
    });

    if result.is_err() {
        tx.rollback();
    }
    result
}

pub struct MemoryConnection {
    name: String,
    version: u32,
    database: Arc<Mutex<DatabaseState>>,
    driver: Arc<DriverInner>,
    closed: AtomicBool,
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.database.lock().stores.keys().cloned().collect()
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Self::Transaction> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transaction(EngineError::invalid_state(
                "The database connection is closed",
            )));
        }
        if stores.is_empty() {
            return Err(Error::Transaction(EngineError::new(
                "InvalidAccessError",
                "A transaction needs at least one object store",
            )));
        }

        {
            let state = self.database.lock();
            if let Some(missing) = stores
                .iter()
                .find(|store| !state.stores.contains_key(**store))
            {
                return Err(Error::Transaction(EngineError::not_found(format!(
                    "Object store {missing} does not exist"
                ))));
            }
        }

        self.driver
            .transactions_started
            .fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction::new(self.database.clone(), stores, mode))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.database.lock();
        state.connections = state.connections.saturating_sub(1);
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close()
    }
}
