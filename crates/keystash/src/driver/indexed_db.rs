use std::cell::{Cell, RefCell};
use std::ops::Bound;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::mpsc;
use gloo_utils::format::JsValueSerdeExt;
use js_sys::{Array, Function, Promise, Reflect};
use serde_json::Value;
use tracing::{debug, info};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomException, DomStringList, Event, IdbCursor, IdbCursorDirection, IdbCursorWithValue,
    IdbDatabase, IdbFactory, IdbIndex, IdbIndexParameters, IdbKeyRange, IdbObjectStore,
    IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbTransactionMode,
    IdbVersionChangeEvent,
};

use keystash_wasm_utils::KeystashStreamExt;

use crate::driver::{
    Connection, Cursor, DatabaseInfo, Driver, Index, ObjectStore, RawCursorEntry, Request,
    Transaction, TransactionMode, TransactionOutcome, UpgradeHandler, UpgradeTransaction,
    VersionChangeEvent,
};
use crate::error::EngineError;
use crate::key::{Key, KeyPath, KeyRange, QueryDirection};
use crate::schema::{IndexSchema, StoreConfig};
use crate::{Error, Result};

type EventClosure = Closure<dyn FnMut(Event)>;

const COMPLETE: &str = "complete";
const ABORT: &str = "abort";
const BLOCKED: &str = "blocked";

/// Drives the browser's `indexedDB` global.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexedDBDriver;

impl IndexedDBDriver {
    pub fn new() -> Self {
        IndexedDBDriver
    }
}

impl From<DomException> for EngineError {
    fn from(value: DomException) -> Self {
        EngineError::new(value.name(), value.message())
    }
}

impl From<TransactionMode> for IdbTransactionMode {
    fn from(value: TransactionMode) -> Self {
        match value {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        }
    }
}

impl From<QueryDirection> for IdbCursorDirection {
    fn from(value: QueryDirection) -> Self {
        match value {
            QueryDirection::Forward => IdbCursorDirection::Next,
            QueryDirection::Backward => IdbCursorDirection::Prev,
        }
    }
}

#[async_trait(? Send)]
impl Driver for IndexedDBDriver {
    type Connection = IndexedDBConnection;

    fn is_available(&self) -> bool {
        idb_factory().is_ok()
    }

    async fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Result<Self::Connection> {
        let factory = idb_factory()?;
        let request = factory
            .open_with_u32(name, version)
            .map_err(|err| Error::Open(engine_error(err)))?;

        let upgrade_error: Rc<RefCell<Option<Error>>> = Default::default();
        let on_upgrade_needed = on_upgrade.map(|handler| {
            let handler = RefCell::new(Some(handler));
            let upgrade_error = upgrade_error.clone();
            let request = request.clone();

            Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
                let Some(handler) = handler.borrow_mut().take() else {
                    return;
                };
                if let Err(err) = run_upgrade(&request, &event, handler) {
                    upgrade_error.borrow_mut().replace(err);
                }
            }) as Box<dyn FnMut(IdbVersionChangeEvent)>)
        });

        if let Some(closure) = &on_upgrade_needed {
            request.set_onupgradeneeded(Some(closure.as_ref().unchecked_ref()));
        }

        let result = JsFuture::from(request_to_promise(&request)).await;

        request.set_onupgradeneeded(None);
        drop(on_upgrade_needed);

        if let Some(err) = upgrade_error.borrow_mut().take() {
            return Err(Error::Open(EngineError::abort(err.to_string())));
        }

        let db = result
            .map_err(|err| Error::Open(engine_error(err)))?
            .dyn_into::<IdbDatabase>()
            .map_err(|_| {
                Error::Open(EngineError::new(
                    "UnknownError",
                    "The open request did not yield a database",
                ))
            })?;

        debug!("Opened database {} at version {}", name, db.version());
        Ok(IndexedDBConnection {
            name: name.to_string(),
            db,
            closed: Cell::new(false),
        })
    }

    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let factory = idb_factory()?;

        let databases = Reflect::get(&factory, &JsValue::from_str("databases"))
            .map_err(|_| Error::FeatureUnsupported)?;
        let Some(databases) = databases.dyn_ref::<Function>() else {
            return Err(Error::FeatureUnsupported);
        };

        let promise = databases
            .call0(&factory)
            .map_err(|err| Error::Request(engine_error(err)))?;
        let list = JsFuture::from(Promise::resolve(&promise))
            .await
            .map_err(|err| Error::Request(engine_error(err)))?;

        Ok(list.into_serde::<Vec<DatabaseInfo>>()?)
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let factory = idb_factory()?;
        let request = factory
            .delete_database(name)
            .map_err(|err| Error::Request(engine_error(err)))?;

        JsFuture::from(delete_request_to_promise(&request))
            .await
            .map_err(|err| {
                if err.as_string().as_deref() == Some(BLOCKED) {
                    Error::BlockedDelete(name.to_string())
                } else {
                    Error::Request(engine_error(err))
                }
            })?;

        info!("Deleted database {name}");
        Ok(())
    }
}

fn run_upgrade(
    request: &IdbOpenDbRequest,
    event: &IdbVersionChangeEvent,
    handler: UpgradeHandler,
) -> Result<()> {
    let db = request
        .result()
        .map_err(|err| Error::Open(engine_error(err)))?
        .unchecked_into::<IdbDatabase>();
    let tx = request.transaction().ok_or_else(|| {
        Error::Open(EngineError::invalid_state(
            "The upgrade has no version change transaction",
        ))
    })?;

    let upgrade = IndexedDBUpgradeTransaction {
        db,
        tx: tx.clone(),
    };
    let result = handler(&VersionChangeEvent {
        tx: &upgrade,
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
    });

    if result.is_err() {
        let _ = tx.abort();
    }
    result
}

pub struct IndexedDBConnection {
    name: String,
    db: IdbDatabase,
    closed: Cell<bool>,
}

impl Connection for IndexedDBConnection {
    type Transaction = IndexedDBTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn store_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Self::Transaction> {
        let names = stores
            .iter()
            .map(|store| JsValue::from_str(store))
            .collect::<Array>();

        let tx = self
            .db
            .transaction_with_str_sequence_and_mode(&names, mode.into())
            .map_err(|err| Error::Transaction(engine_error(err)))?;
        let terminal = transaction_to_promise(&tx);

        Ok(IndexedDBTransaction { tx, mode, terminal })
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.db.close();
        }
    }
}

impl Drop for IndexedDBConnection {
    fn drop(&mut self) {
        self.close()
    }
}

pub struct IndexedDBTransaction {
    tx: IdbTransaction,
    mode: TransactionMode,
    terminal: Promise,
}

#[async_trait(? Send)]
impl Transaction for IndexedDBTransaction {
    type ObjectStore = IndexedDBObjectStore;

    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store(&self, name: &str) -> Result<Self::ObjectStore> {
        let store = self
            .tx
            .object_store(name)
            .map_err(|err| Error::Transaction(engine_error(err)))?;
        Ok(IndexedDBObjectStore { store })
    }

    fn abort(&self) -> Result<()> {
        self.tx
            .abort()
            .map_err(|err| Error::Transaction(engine_error(err)))
    }

    async fn outcome(self) -> TransactionOutcome {
        let terminal = JsFuture::from(self.terminal).await;
        if matches!(&terminal, Ok(value) if value.as_string().as_deref() == Some(COMPLETE)) {
            return TransactionOutcome::Complete;
        }

        // A failed request sets the transaction's error before it is aborted, an explicit abort
        // leaves it empty.
        match self.tx.error() {
            Some(err) => TransactionOutcome::Error(err.into()),
            None => TransactionOutcome::Abort(EngineError::abort("The transaction was aborted")),
        }
    }
}

pub struct IndexedDBObjectStore {
    store: IdbObjectStore,
}

impl ObjectStore for IndexedDBObjectStore {
    type Index = IndexedDBIndex;

    fn name(&self) -> String {
        self.store.name()
    }

    fn index_names(&self) -> Vec<String> {
        string_list(&self.store.index_names())
    }

    fn index(&self, name: &str) -> Result<Self::Index> {
        let index = self.store.index(name).map_err(idb_request_error)?;
        Ok(IndexedDBIndex { index })
    }

    fn add(&self, value: &Value, key: Option<&Key>) -> Request<Key> {
        issue(
            || {
                let value = JsValue::from_serde(value)?;
                match key {
                    Some(key) => self.store.add_with_key(&value, &JsValue::from_serde(key)?),
                    None => self.store.add(&value),
                }
                .map_err(idb_request_error)
            },
            to_key,
        )
    }

    fn put(&self, value: &Value, key: Option<&Key>) -> Request<Key> {
        issue(
            || {
                let value = JsValue::from_serde(value)?;
                match key {
                    Some(key) => self.store.put_with_key(&value, &JsValue::from_serde(key)?),
                    None => self.store.put(&value),
                }
                .map_err(idb_request_error)
            },
            to_key,
        )
    }

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        issue(
            || {
                self.store
                    .get(&JsValue::from_serde(key)?)
                    .map_err(idb_request_error)
            },
            to_optional_value,
        )
    }

    fn get_all(&self, range: &KeyRange) -> Request<Vec<Value>> {
        issue(
            || {
                self.store
                    .get_all_with_key(&key_range(range)?)
                    .map_err(idb_request_error)
            },
            to_values,
        )
    }

    fn delete(&self, range: &KeyRange) -> Request<()> {
        issue(
            || {
                match range {
                    KeyRange::All => self.store.clear(),
                    range => self.store.delete(&key_range(range)?),
                }
                .map_err(idb_request_error)
            },
            |_| Ok(()),
        )
    }

    fn clear(&self) -> Request<()> {
        issue(
            || self.store.clear().map_err(idb_request_error),
            |_| Ok(()),
        )
    }

    fn count(&self, range: &KeyRange) -> Request<u64> {
        issue(
            || {
                self.store
                    .count_with_key(&key_range(range)?)
                    .map_err(idb_request_error)
            },
            to_count,
        )
    }

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        cursor(range, true, |range| {
            self.store
                .open_cursor_with_range_and_direction(range, direction.into())
        })
    }

    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        cursor(range, false, |range| {
            self.store
                .open_key_cursor_with_range_and_direction(range, direction.into())
        })
    }
}

pub struct IndexedDBIndex {
    index: IdbIndex,
}

impl Index for IndexedDBIndex {
    fn name(&self) -> String {
        self.index.name()
    }

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        issue(
            || {
                self.index
                    .get(&JsValue::from_serde(key)?)
                    .map_err(idb_request_error)
            },
            to_optional_value,
        )
    }

    fn count(&self, range: &KeyRange) -> Request<u64> {
        issue(
            || {
                self.index
                    .count_with_key(&key_range(range)?)
                    .map_err(idb_request_error)
            },
            to_count,
        )
    }

    fn open_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        cursor(range, true, |range| {
            self.index
                .open_cursor_with_range_and_direction(range, direction.into())
        })
    }

    fn open_key_cursor(&self, range: &KeyRange, direction: QueryDirection) -> Cursor {
        cursor(range, false, |range| {
            self.index
                .open_key_cursor_with_range_and_direction(range, direction.into())
        })
    }
}

struct IndexedDBUpgradeTransaction {
    db: IdbDatabase,
    tx: IdbTransaction,
}

impl IndexedDBUpgradeTransaction {
    fn store(&self, name: &str) -> Result<IdbObjectStore> {
        self.tx.object_store(name).map_err(idb_request_error)
    }
}

impl UpgradeTransaction for IndexedDBUpgradeTransaction {
    fn store_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn create_object_store(&self, name: &str, config: &StoreConfig) -> Result<()> {
        let params = IdbObjectStoreParameters::new();
        if let Some(key_path) = &config.key_path {
            set_property(&params, "keyPath", &key_path_value(key_path))?;
        }
        set_property(
            &params,
            "autoIncrement",
            &JsValue::from_bool(config.auto_increment),
        )?;

        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(idb_request_error)?;
        Ok(())
    }

    fn delete_object_store(&self, name: &str) -> Result<()> {
        self.db
            .delete_object_store(name)
            .map_err(idb_request_error)
    }

    fn index_names(&self, store: &str) -> Result<Vec<String>> {
        Ok(string_list(&self.store(store)?.index_names()))
    }

    fn create_index(&self, store: &str, index: &IndexSchema) -> Result<()> {
        let params = IdbIndexParameters::new();
        set_property(&params, "unique", &JsValue::from_bool(index.options.unique))?;
        set_property(
            &params,
            "multiEntry",
            &JsValue::from_bool(index.options.multi_entry),
        )?;

        let store = self.store(store)?;
        match &index.key_path {
            KeyPath::Single(path) => {
                store.create_index_with_str_and_optional_parameters(&index.name, path, &params)
            }
            KeyPath::Sequence(_) => store.create_index_with_str_sequence_and_optional_parameters(
                &index.name,
                &key_path_value(&index.key_path),
                &params,
            ),
        }
        .map_err(idb_request_error)?;
        Ok(())
    }

    fn delete_index(&self, store: &str, index: &str) -> Result<()> {
        self.store(store)?
            .delete_index(index)
            .map_err(idb_request_error)
    }

    fn add(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()> {
        let store = self.store(store)?;
        let value = JsValue::from_serde(value)?;
        match key {
            Some(key) => store.add_with_key(&value, &JsValue::from_serde(key)?),
            None => store.add(&value),
        }
        .map_err(idb_request_error)?;
        Ok(())
    }

    fn put(&self, store: &str, value: &Value, key: Option<&Key>) -> Result<()> {
        let store = self.store(store)?;
        let value = JsValue::from_serde(value)?;
        match key {
            Some(key) => store.put_with_key(&value, &JsValue::from_serde(key)?),
            None => store.put(&value),
        }
        .map_err(idb_request_error)?;
        Ok(())
    }

    fn delete(&self, store: &str, range: &KeyRange) -> Result<()> {
        let store = self.store(store)?;
        match range {
            KeyRange::All => store.clear(),
            range => store.delete(&key_range(range)?),
        }
        .map_err(idb_request_error)?;
        Ok(())
    }

    fn clear(&self, store: &str) -> Result<()> {
        self.store(store)?.clear().map_err(idb_request_error)?;
        Ok(())
    }
}

fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let factory = Reflect::get(&global, &JsValue::from_str("indexedDB"))
        .map_err(|_| Error::StoreUnavailable)?;
    if factory.is_undefined() || factory.is_null() {
        return Err(Error::StoreUnavailable);
    }

    factory
        .dyn_into::<IdbFactory>()
        .map_err(|_| Error::StoreUnavailable)
}

/// Issues a request and converts its result once it succeeded.
fn issue<T: 'static>(
    request: impl FnOnce() -> Result<IdbRequest>,
    convert: impl FnOnce(JsValue) -> Result<T> + 'static,
) -> Request<T> {
    let request = match request() {
        Ok(request) => request,
        Err(err) => return Request::ready(Err(err)),
    };
    let promise = request_to_promise(&request);

    Request::new(async move {
        let result = JsFuture::from(promise)
            .await
            .map_err(|err| Error::Request(engine_error(err)))?;
        convert(result)
    })
}

fn cursor(
    range: &KeyRange,
    with_value: bool,
    open: impl FnOnce(&JsValue) -> std::result::Result<IdbRequest, JsValue>,
) -> Cursor {
    let request = match key_range(range).and_then(|range| open(&range).map_err(idb_request_error))
    {
        Ok(request) => request,
        Err(err) => return futures::stream::once(async move { Err(err) }).keystash_boxed(),
    };

    // The cursor has to be continued from within the success event, so entries are forwarded
    // into a channel as they arrive.
    let (sender, receiver) = mpsc::unbounded::<Result<RawCursorEntry>>();
    let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> = Default::default();

    let on_success = {
        let request = request.clone();
        let sender = sender.clone();
        let closures = closures.clone();

        Closure::wrap(Box::new(move |_: Event| {
            let cursor = request
                .result()
                .ok()
                .filter(|result| !result.is_null() && !result.is_undefined());
            let Some(cursor) = cursor else {
                release_request(&request, &closures);
                sender.close_channel();
                return;
            };

            let cursor = cursor.unchecked_into::<IdbCursor>();
            let entry = cursor_entry(&cursor, with_value);
            let failed = entry.is_err();

            if sender.unbounded_send(entry).is_err() || failed {
                release_request(&request, &closures);
                sender.close_channel();
                return;
            }

            if let Err(err) = cursor.continue_() {
                let _ = sender.unbounded_send(Err(idb_request_error(err)));
                release_request(&request, &closures);
                sender.close_channel();
            }
        }) as Box<dyn FnMut(Event)>)
    };

    let on_error = {
        let request = request.clone();
        let closures = closures.clone();

        Closure::wrap(Box::new(move |_: Event| {
            let _ = sender.unbounded_send(Err(Error::Request(request_error(&request))));
            release_request(&request, &closures);
            sender.close_channel();
        }) as Box<dyn FnMut(Event)>)
    };

    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    closures.borrow_mut().replace((on_success, on_error));

    receiver.keystash_boxed()
}

fn cursor_entry(cursor: &IdbCursor, with_value: bool) -> Result<RawCursorEntry> {
    let key = cursor
        .key()
        .map_err(idb_request_error)?
        .into_serde::<Key>()?;
    let primary_key = cursor
        .primary_key()
        .map_err(idb_request_error)?
        .into_serde::<Key>()?;

    let value = if with_value {
        let value = cursor
            .unchecked_ref::<IdbCursorWithValue>()
            .value()
            .map_err(idb_request_error)?;
        Some(value.into_serde::<Value>()?)
    } else {
        None
    };

    Ok(RawCursorEntry {
        key,
        primary_key,
        value,
    })
}

/// Converts a request into a promise that resolves with the request's result or rejects with its
/// `DOMException`.
fn request_to_promise(request: &IdbRequest) -> Promise {
    let request = request.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> = Default::default();

        let on_success = {
            let request = request.clone();
            let closures = closures.clone();
            Closure::wrap(Box::new(move |_: Event| {
                let result = request.result().unwrap_or(JsValue::UNDEFINED);
                let _ = resolve.call1(&JsValue::UNDEFINED, &result);
                release_request(&request, &closures);
            }) as Box<dyn FnMut(Event)>)
        };

        let on_error = {
            let request = request.clone();
            let closures = closures.clone();
            Closure::wrap(Box::new(move |_: Event| {
                let error = request
                    .error()
                    .ok()
                    .flatten()
                    .map(JsValue::from)
                    .unwrap_or_else(|| JsValue::from_str("Unknown IndexedDB error"));
                let _ = reject.call1(&JsValue::UNDEFINED, &error);
                release_request(&request, &closures);
            }) as Box<dyn FnMut(Event)>)
        };

        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        closures.borrow_mut().replace((on_success, on_error));
    })
}

/// Like `request_to_promise`, but also rejects when the deletion is blocked by open connections.
fn delete_request_to_promise(request: &IdbOpenDbRequest) -> Promise {
    let request = request.clone();

    Promise::new(&mut move |resolve, reject| {
        type Closures = (EventClosure, EventClosure, EventClosure);
        let closures: Rc<RefCell<Option<Closures>>> = Default::default();

        let release = {
            let request = request.clone();
            let closures = closures.clone();
            move || {
                request.set_onsuccess(None);
                request.set_onerror(None);
                request.set_onblocked(None);
                closures.borrow_mut().take();
            }
        };

        let on_success = {
            let release = release.clone();
            Closure::wrap(Box::new(move |_: Event| {
                let _ = resolve.call0(&JsValue::UNDEFINED);
                release();
            }) as Box<dyn FnMut(Event)>)
        };

        let on_error = {
            let request = request.clone();
            let reject = reject.clone();
            let release = release.clone();
            Closure::wrap(Box::new(move |_: Event| {
                let error = request
                    .error()
                    .ok()
                    .flatten()
                    .map(JsValue::from)
                    .unwrap_or_else(|| JsValue::from_str("Unknown IndexedDB error"));
                let _ = reject.call1(&JsValue::UNDEFINED, &error);
                release();
            }) as Box<dyn FnMut(Event)>)
        };

        let on_blocked = Closure::wrap(Box::new(move |_: Event| {
            let _ = reject.call1(&JsValue::UNDEFINED, &JsValue::from_str(BLOCKED));
            release();
        }) as Box<dyn FnMut(Event)>);

        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
        closures
            .borrow_mut()
            .replace((on_success, on_error, on_blocked));
    })
}

/// Captures the terminal event of a transaction. The promise resolves with `"complete"` or
/// `"abort"`, whichever fires first.
fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx = tx.clone();

    Promise::new(&mut move |resolve, _reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> = Default::default();

        let release = {
            let tx = tx.clone();
            let closures = closures.clone();
            move || {
                tx.set_oncomplete(None);
                tx.set_onabort(None);
                closures.borrow_mut().take();
            }
        };

        let on_complete = {
            let resolve = resolve.clone();
            let release = release.clone();
            Closure::wrap(Box::new(move |_: Event| {
                let _ = resolve.call1(&JsValue::UNDEFINED, &JsValue::from_str(COMPLETE));
                release();
            }) as Box<dyn FnMut(Event)>)
        };

        let on_abort = Closure::wrap(Box::new(move |_: Event| {
            let _ = resolve.call1(&JsValue::UNDEFINED, &JsValue::from_str(ABORT));
            release();
        }) as Box<dyn FnMut(Event)>);

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));
        closures.borrow_mut().replace((on_complete, on_abort));
    })
}

fn release_request<T>(request: &IdbRequest, closures: &Rc<RefCell<Option<T>>>) {
    request.set_onsuccess(None);
    request.set_onerror(None);
    closures.borrow_mut().take();
}

fn key_range(range: &KeyRange) -> Result<JsValue> {
    fn bound(bound: &Bound<Key>) -> Result<Option<(JsValue, bool)>> {
        Ok(match bound {
            Bound::Included(key) => Some((JsValue::from_serde(key)?, false)),
            Bound::Excluded(key) => Some((JsValue::from_serde(key)?, true)),
            Bound::Unbounded => None,
        })
    }

    let range = match range {
        KeyRange::All => return Ok(JsValue::UNDEFINED),
        KeyRange::Only(key) => IdbKeyRange::only(&JsValue::from_serde(key)?),
        KeyRange::Range { start, end } => match (bound(start)?, bound(end)?) {
            (Some((lower, lower_open)), Some((upper, upper_open))) => {
                IdbKeyRange::bound_with_lower_open_and_upper_open(
                    &lower, &upper, lower_open, upper_open,
                )
            }
            (Some((lower, open)), None) => IdbKeyRange::lower_bound_with_open(&lower, open),
            (None, Some((upper, open))) => IdbKeyRange::upper_bound_with_open(&upper, open),
            (None, None) => return Ok(JsValue::UNDEFINED),
        },
    };

    range.map(JsValue::from).map_err(idb_request_error)
}

fn key_path_value(key_path: &KeyPath) -> JsValue {
    match key_path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Sequence(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<Array>()
            .into(),
    }
}

fn set_property(target: &JsValue, name: &str, value: &JsValue) -> Result<()> {
    Reflect::set(target, &JsValue::from_str(name), value).map_err(idb_request_error)?;
    Ok(())
}

fn string_list(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|idx| list.item(idx)).collect()
}

fn to_key(value: JsValue) -> Result<Key> {
    Ok(value.into_serde::<Key>()?)
}

fn to_optional_value(value: JsValue) -> Result<Option<Value>> {
    if value.is_undefined() {
        return Ok(None);
    }
    Ok(Some(value.into_serde::<Value>()?))
}

fn to_values(value: JsValue) -> Result<Vec<Value>> {
    Ok(value.into_serde::<Vec<Value>>()?)
}

fn to_count(value: JsValue) -> Result<u64> {
    value.as_f64().map(|count| count as u64).ok_or_else(|| {
        Error::Request(EngineError::data(
            "The count request did not yield a number",
        ))
    })
}

fn request_error(request: &IdbRequest) -> EngineError {
    request
        .error()
        .ok()
        .flatten()
        .map(EngineError::from)
        .unwrap_or_else(|| EngineError::new("UnknownError", "The request failed"))
}

fn idb_request_error(err: JsValue) -> Error {
    Error::Request(engine_error(err))
}

fn engine_error(value: JsValue) -> EngineError {
    match value.dyn_into::<DomException>() {
        Ok(exception) => exception.into(),
        Err(value) => EngineError::new(
            "UnknownError",
            value
                .as_string()
                .unwrap_or_else(|| format!("{value:?}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use wasm_bindgen_test::wasm_bindgen_test;

    use super::*;

    #[wasm_bindgen_test]
    fn test_count_requires_a_number() {
        assert_eq!(to_count(JsValue::from_f64(3.0)).ok(), Some(3));
        assert!(matches!(
            to_count(JsValue::from_str("3")),
            Err(Error::Request(_))
        ));
        assert!(matches!(
            to_count(JsValue::UNDEFINED),
            Err(Error::Request(_))
        ));
    }
}
