use std::cell::RefCell;

use serde_json::Value;

use crate::driver::memory::state::{DatabaseState, EngineResult, UndoEntry};
use crate::driver::UpgradeTransaction;
use crate::error::EngineError;
use crate::key::{Key, KeyRange};
use crate::schema::{IndexSchema, StoreConfig};
use crate::{Error, Result};

/// The version change transaction of the in-memory engine. It holds the database exclusively for
/// the duration of the upgrade.
pub(super) struct MemoryUpgradeTransaction<'a> {
    database: RefCell<&'a mut DatabaseState>,
    undo: RefCell<Vec<UndoEntry>>,
    failure: RefCell<Option<EngineError>>,
}

impl<'a> MemoryUpgradeTransaction<'a> {
    pub fn new(database: &'a mut DatabaseState) -> Self {
        MemoryUpgradeTransaction {
            database: RefCell::new(database),
            undo: Default::default(),
            failure: Default::default(),
        }
    }

    /// Returns the error that aborted the upgrade, if a request failed.
    pub fn failure(&self) -> Option<EngineError> {
        self.failure.borrow().clone()
    }

    pub fn rollback(self) {
        let undo = self.undo.into_inner();
        self.database.into_inner().rollback(undo);
    }

    fn apply<T>(
        &self,
        f: impl FnOnce(&mut DatabaseState, &mut Vec<UndoEntry>) -> EngineResult<T>,
    ) -> Result<T> {
        if let Some(err) = self.failure() {
            return Err(Error::Transaction(err));
        }

        let mut database = self.database.borrow_mut();
        let mut undo = self.undo.borrow_mut();

        f(&mut **database, &mut undo).map_err(|err| {
            if err.is_constraint_error() {
                self.failure.replace(Some(err.clone()));
            }
            Error::Request(err)
        })
    }
}

impl UpgradeTransaction for MemoryUpgradeTransaction<'_> {
    fn store_names(&self) -> Vec<String> {
        self.database.borrow().stores.keys().cloned().collect()
    }

    fn create_object_store(&self, name: &str, config: &StoreConfig) -> Result<()> {
        self.apply(|db, undo| db.create_store(name, config, undo))
    }

    fn delete_object_store(&self, name: &str) -> Result<()> {
        self.apply(|db, undo| db.delete_store(name, undo))
    }

    fn index_names(&self, store: &str) -> Result<Vec<String>> {
        self.database
            .borrow()
            .store(store)
            .map(|data| data.indexes.keys().cloned().collect())
            .map_err(Error::Request)
    }

    fn create_index(&self, store: &str, index: &IndexSchema) -> Result<()> {
        self.apply(|db, undo| db.create_index(store, index, undo))
    }

    fn delete_index(&self, store: &str, index: &str) -> Result<()> {
        self.apply(|db, undo| db.delete_index(store, index, undo))
    }

    fn add(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()> {
        self.apply(|db, undo| db.write(store, value, key, false, undo).map(|_| ()))
    }

    fn put(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()> {
        self.apply(|db, undo| db.write(store, value, key, true, undo).map(|_| ()))
    }

    fn delete(&self, store: &str, range: &KeyRange) -> Result<()> {
        self.apply(|db, undo| db.delete(store, range, undo))
    }

    fn clear(&self, store: &str) -> Result<()> {
        self.apply(|db, undo| db.delete(store, &KeyRange::All, undo))
    }
}
