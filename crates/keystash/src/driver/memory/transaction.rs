use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use keystash_wasm_utils::KeystashStreamExt;

use crate::driver::memory::state::{DatabaseState, EngineResult, StoreData, UndoEntry};
use crate::driver::{
    Cursor, Index, ObjectStore, RawCursorEntry, Request, Transaction, TransactionMode,
    TransactionOutcome,
};
use crate::error::EngineError;
use crate::key::{Key, KeyRange, QueryDirection};
use crate::{Error, Result};

pub struct MemoryTransaction {
    shared: Arc<TransactionState>,
}

pub struct MemoryObjectStore {
    shared: Arc<TransactionState>,
    name: String,
}

pub struct MemoryIndex {
    shared: Arc<TransactionState>,
    store: String,
    name: String,
}

struct TransactionState {
    database: Arc<Mutex<DatabaseState>>,
    scope: Vec<String>,
    mode: TransactionMode,
    inner: Mutex<TransactionInner>,
}

struct TransactionInner {
    status: Status,
    undo: Vec<UndoEntry>,
}

enum Status {
    Active,
    Finished,
    Failed(EngineError),
    Aborted(EngineError),
}

impl MemoryTransaction {
    pub(super) fn new(
        database: Arc<Mutex<DatabaseState>>,
        scope: &[&str],
        mode: TransactionMode,
    ) -> Self {
        MemoryTransaction {
            shared: Arc::new(TransactionState {
                database,
                scope: scope.iter().map(ToString::to_string).collect(),
                mode,
                inner: Mutex::new(TransactionInner {
                    status: Status::Active,
                    undo: vec![],
                }),
            }),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(? Send))]
#[async_trait]
impl Transaction for MemoryTransaction {
    type ObjectStore = MemoryObjectStore;

    fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    fn object_store(&self, name: &str) -> Result<Self::ObjectStore> {
        if !self.shared.scope.iter().any(|store| store == name) {
            return Err(Error::Transaction(EngineError::not_found(format!(
                "Object store {name} is not in the scope of this transaction"
            ))));
        }
        Ok(MemoryObjectStore {
            shared: self.shared.clone(),
            name: name.to_string(),
        })
    }

    fn abort(&self) -> Result<()> {
        self.shared.abort()
    }

    async fn outcome(self) -> TransactionOutcome {
        self.shared.finish()
    }
}

impl TransactionState {
    fn read<T>(&self, store: &str, f: impl FnOnce(&StoreData) -> EngineResult<T>) -> Result<T> {
        let inner = self.inner.lock();
        if !matches!(inner.status, Status::Active) {
            return Err(Error::Request(EngineError::transaction_inactive(
                "The transaction has finished",
            )));
        }
        let database = self.database.lock();
        database
            .store(store)
            .and_then(f)
            .map_err(Error::Request)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut DatabaseState, &mut Vec<UndoEntry>) -> EngineResult<T>,
    ) -> Result<T> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !matches!(inner.status, Status::Active) {
            return Err(Error::Request(EngineError::transaction_inactive(
                "The transaction has finished",
            )));
        }
        if self.mode == TransactionMode::ReadOnly {
            return Err(Error::Request(EngineError::read_only(
                "The transaction is read-only",
            )));
        }

        let mut database = self.database.lock();
        match f(&mut database, &mut inner.undo) {
            Ok(value) => Ok(value),
            Err(err) if err.is_constraint_error() => {
                database.rollback(std::mem::take(&mut inner.undo));
                inner.status = Status::Failed(err.clone());
                Err(Error::Request(err))
            }
            Err(err) => Err(Error::Request(err)),
        }
    }

    fn abort(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !matches!(inner.status, Status::Active) {
            return Err(Error::Transaction(EngineError::invalid_state(
                "The transaction has already finished",
            )));
        }

        self.database
            .lock()
            .rollback(std::mem::take(&mut inner.undo));
        inner.status = Status::Aborted(EngineError::abort("The transaction was aborted"));
        Ok(())
    }

    fn finish(&self) -> TransactionOutcome {
        let mut inner = self.inner.lock();
        inner.undo.clear();

        match std::mem::replace(&mut inner.status, Status::Finished) {
            Status::Active | Status::Finished => TransactionOutcome::Complete,
            Status::Failed(err) => TransactionOutcome::Error(err),
            Status::Aborted(err) => TransactionOutcome::Abort(err),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    type Index = MemoryIndex;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn index_names(&self) -> Vec<String> {
        self.shared
            .database
            .lock()
            .store(&self.name)
            .map(|data| data.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn index(&self, name: &str) -> Result<Self::Index> {
        if !self.index_names().iter().any(|index| index == name) {
            return Err(Error::Request(EngineError::not_found(format!(
                "Index {name} does not exist on object store {}",
                self.name
            ))));
        }
        Ok(MemoryIndex {
            shared: self.shared.clone(),
            store: self.name.clone(),
            name: name.to_string(),
        })
    }

    fn add(&self, value: &Value, key: Option<&Key>) -> Request<Key> {
        Request::ready(
            self.shared
                .write(|db, undo| db.write(&self.name, value, key, false, undo)),
        )
    }

    fn put(&self, value: &Value, key: Option<&Key>) -> Request<Key> {
        Request::ready(
            self.shared
                .write(|db, undo| db.write(&self.name, value, key, true, undo)),
        )
    }

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        Request::ready(
            self.shared
                .read(&self.name, |data| Ok(data.records.get(key).cloned())),
        )
    }

    fn get_all(&self, range: &KeyRange) -> Request<Vec<Value>> {
        Request::ready(self.shared.read(&self.name, |data| {
            Ok(data
                .records
                .iter()
                .filter(|(key, _)| range.contains(key))
                .map(|(_, value)| value.clone())
                .collect())
        }))
    }

    fn delete(&self, range: &KeyRange) -> Request<()> {
        Request::ready(
            self.shared
                .write(|db, undo| db.delete(&self.name, range, undo)),
        )
    }

    fn clear(&self) -> Request<()> {
        Request::ready(
            self.shared
                .write(|db, undo| db.delete(&self.name, &KeyRange::All, undo)),
        )
    }

    fn count(&self, range: &KeyRange) -> Request<u64> {
        Request::ready(self.shared.read(&self.name, |data| {
            Ok(data.records.keys().filter(|key| range.contains(key)).count() as u64)
        }))
    }

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        CursorState::new(
            self.shared.clone(),
            CursorSource::Store(self.name.clone()),
            range,
            direction,
            true,
        )
        .into_stream()
    }

    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        CursorState::new(
            self.shared.clone(),
            CursorSource::Store(self.name.clone()),
            range,
            direction,
            false,
        )
        .into_stream()
    }
}

impl MemoryIndex {
    fn cursor(&self, range: &KeyRange, direction: QueryDirection, with_value: bool) -> Cursor {
        CursorState::new(
            self.shared.clone(),
            CursorSource::Index {
                store: self.store.clone(),
                index: self.name.clone(),
            },
            range,
            direction,
            with_value,
        )
        .into_stream()
    }

    fn entries(&self, data: &StoreData) -> EngineResult<Vec<(Key, Key)>> {
        let schema = data.indexes.get(&self.name).ok_or_else(|| {
            EngineError::invalid_state(format!("Index {} has been deleted", self.name))
        })?;
        Ok(data.index_entries(schema))
    }
}

impl Index for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        Request::ready(self.shared.read(&self.store, |data| {
            Ok(self
                .entries(data)?
                .into_iter()
                .find(|(index_key, _)| index_key == key)
                .and_then(|(_, primary_key)| data.records.get(&primary_key).cloned()))
        }))
    }

    fn count(&self, range: &KeyRange) -> Request<u64> {
        Request::ready(self.shared.read(&self.store, |data| {
            Ok(self
                .entries(data)?
                .iter()
                .filter(|(index_key, _)| range.contains(index_key))
                .count() as u64)
        }))
    }

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        self.cursor(range, direction, true)
    }

    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        self.cursor(range, direction, false)
    }
}

enum CursorSource {
    Store(String),
    Index { store: String, index: String },
}

/// A cursor advances lazily, one position per poll, re-reading the store each time so that it
/// observes writes made in the same transaction.
struct CursorState {
    shared: Arc<TransactionState>,
    source: CursorSource,
    range: KeyRange,
    direction: QueryDirection,
    with_value: bool,
    position: Option<(Key, Key)>,
    done: bool,
}

impl CursorState {
    fn new(
        shared: Arc<TransactionState>,
        source: CursorSource,
        range: &KeyRange,
        direction: QueryDirection,
        with_value: bool,
    ) -> Self {
        CursorState {
            shared,
            source,
            range: range.clone(),
            direction,
            with_value,
            position: None,
            done: false,
        }
    }

    fn into_stream(self) -> Cursor {
        futures::stream::unfold(self, |mut state| async move {
            if state.done {
                return None;
            }
            match state.advance() {
                Ok(Some(entry)) => Some((Ok(entry), state)),
                Ok(None) => None,
                Err(err) => {
                    state.done = true;
                    Some((Err(err), state))
                }
            }
        })
        .keystash_boxed()
    }

    fn advance(&mut self) -> Result<Option<RawCursorEntry>> {
        let store = match &self.source {
            CursorSource::Store(store) => store,
            CursorSource::Index { store, .. } => store,
        };

        let entry = self.shared.read(store, |data| {
            let entries = match &self.source {
                CursorSource::Store(_) => data
                    .records
                    .keys()
                    .map(|key| (key.clone(), key.clone()))
                    .collect::<Vec<_>>(),
                CursorSource::Index { index, .. } => {
                    let schema = data.indexes.get(index).ok_or_else(|| {
                        EngineError::invalid_state(format!("Index {index} has been deleted"))
                    })?;
                    data.index_entries(schema)
                }
            };

            let position = self.position.as_ref();
            let mut candidates = entries
                .into_iter()
                .filter(|(key, _)| self.range.contains(key));

            let next = match self.direction {
                QueryDirection::Forward => {
                    candidates.find(|entry| position.map_or(true, |position| entry > position))
                }
                QueryDirection::Backward => candidates
                    .rev()
                    .find(|entry| position.map_or(true, |position| entry < position)),
            };

            Ok(next.map(|(key, primary_key)| {
                let value = if self.with_value {
                    data.records.get(&primary_key).cloned()
                } else {
                    None
                };
                RawCursorEntry {
                    key,
                    primary_key,
                    value,
                }
            }))
        })?;

        if let Some(entry) = &entry {
            self.position = Some((entry.key.clone(), entry.primary_key.clone()));
        }
        Ok(entry)
    }
}
