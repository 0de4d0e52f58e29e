use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::{join_all, ready};
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use keystash_wasm_utils::{KeystashStreamExt, PinnedStream, SendUnlessWasm};

use crate::config::DbConfig;
use crate::driver::{
    Connection, Cursor, Driver, Index, ObjectStore, ObjectStoreOf, RawCursorEntry,
    TransactionMode, TransactionOf,
};
use crate::key::{Key, KeyRange, QueryDirection};
use crate::opener::open_database_if_exists;
use crate::reconciler::create_object_stores;
use crate::schema::{MigrationFactory, StoreSchema};
use crate::transaction::{begin, TransactionScope};
use crate::{Error, Result};

/// Transactional access to the object stores of one versioned database.
///
/// Every operation opens its own connection, runs exactly one transaction on the store it
/// targets and closes the connection again when its result is available.
pub struct KeyStash<D: Driver> {
    inner: Arc<Inner<D>>,
}

struct Inner<D> {
    driver: D,
    name: String,
    version: AtomicU32,
    schema_lock: tokio::sync::Mutex<()>,
}

/// Administrative schema changes that bump the database's version.
pub struct SchemaAdmin<'a, D: Driver> {
    stash: &'a KeyStash<D>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry<T> {
    pub key: Key,
    pub primary_key: Key,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyEntry {
    pub primary_key: Key,
    pub key: Key,
}

/// An entry for `KeyStash::bulk_add`. `key` is only needed for stores with out-of-line keys.
#[derive(Debug, Clone)]
pub struct BulkItem<T> {
    pub value: T,
    pub key: Option<Key>,
}

impl<T> BulkItem<T> {
    pub fn new(value: T) -> Self {
        BulkItem { value, key: None }
    }

    pub fn with_key(value: T, key: impl Into<Key>) -> Self {
        BulkItem {
            value,
            key: Some(key.into()),
        }
    }
}

struct Session<D: Driver> {
    connection: D::Connection,
    scope: TransactionScope<TransactionOf<D>>,
}

impl<D: Driver> Session<D> {
    fn store(&self) -> &ObjectStoreOf<D> {
        self.scope.object_store()
    }

    fn index(
        &self,
        store_name: &str,
        index_name: &str,
    ) -> Result<<ObjectStoreOf<D> as ObjectStore>::Index> {
        if !self
            .store()
            .index_names()
            .iter()
            .any(|name| name == index_name)
        {
            return Err(Error::IndexNotFound {
                store: store_name.to_string(),
                index: index_name.to_string(),
            });
        }
        self.store().index(index_name)
    }

    /// Waits for the transaction to complete, then closes the connection.
    async fn finish(self) -> Result<()> {
        let Session { connection, scope } = self;
        let outcome = scope.finish().await;
        connection.close();
        outcome.into_result()
    }

    /// Closes the connection without waiting for the transaction, which commits on its own.
    fn close(self) {
        let Session { connection, scope } = self;
        drop(scope);
        connection.close();
    }

    /// Turns a cursor into a stream that closes the connection once the cursor is exhausted.
    fn into_stream<R: SendUnlessWasm + 'static>(
        self,
        cursor: Cursor,
        convert: fn(RawCursorEntry) -> Result<R>,
    ) -> PinnedStream<Result<R>> {
        let tail = stream::once(self.finish()).filter_map(|result| ready(result.err().map(Err)));

        cursor
            .map(move |entry| entry.and_then(convert))
            .chain(tail)
            .keystash_boxed()
    }
}

impl<D: Driver> Clone for KeyStash<D> {
    fn clone(&self) -> Self {
        KeyStash {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> KeyStash<D> {
    /// Opens the database described by `config`, creating the declared object stores and running
    /// pending migrations if the database is new or its version increased.
    ///
    /// If the database already exists at `config.version` or above, nothing is reconciled and the
    /// handle works with the version found on disk.
    #[instrument(skip_all, fields(name = %config.name, version = config.version))]
    pub async fn open(driver: D, config: DbConfig) -> Result<Self> {
        config.validate()?;

        let version = match existing_version(&driver, &config.name).await? {
            Some(version) if version >= config.version => {
                debug!("Database is already at version {}", version);
                version
            }
            _ => {
                create_object_stores(
                    &driver,
                    &config.name,
                    config.version,
                    &config.object_stores_meta,
                    config.migration_factory.clone(),
                )
                .await?;
                config.version
            }
        };
        info!("Database is ready at version {}", version);

        Ok(KeyStash {
            inner: Arc::new(Inner {
                driver,
                name: config.name,
                version: AtomicU32::new(version),
                schema_lock: Default::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u32 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    pub fn admin(&self) -> SchemaAdmin<'_, D> {
        SchemaAdmin { stash: self }
    }

    /// Adds `value` and returns its key as soon as the add request succeeded.
    pub async fn add<T: Serialize + ?Sized>(
        &self,
        store_name: &str,
        value: &T,
        key: Option<Key>,
    ) -> Result<Key> {
        let value = serde_json::to_value(value)?;
        self.add_value(store_name, value, key).await
    }

    /// Adds every item in its own transaction. The items are added concurrently; items that
    /// were added stay in the store even if others fail.
    pub async fn bulk_add<T: Serialize>(
        &self,
        store_name: &str,
        items: Vec<BulkItem<T>>,
    ) -> Result<Vec<Key>> {
        let values = items
            .into_iter()
            .map(|item| -> Result<_> { Ok((serde_json::to_value(&item.value)?, item.key)) })
            .collect::<Result<Vec<_>>>()?;

        join_all(
            values
                .into_iter()
                .map(|(value, key)| self.add_value(store_name, value, key)),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Adds `value` and returns the stored record once the transaction completed.
    pub async fn add_item<T: Serialize + DeserializeOwned>(
        &self,
        store_name: &str,
        value: &T,
        key: Option<Key>,
    ) -> Result<Option<T>> {
        let value = serde_json::to_value(value)?;

        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let key = session.store().add(&value, key.as_ref()).await?;
        session.finish().await?;

        self.get_by_key(store_name, key).await
    }

    pub async fn add_item_with_key<T: Serialize + DeserializeOwned>(
        &self,
        store_name: &str,
        value: &T,
        key: impl Into<Key>,
    ) -> Result<Option<T>> {
        self.add_item(store_name, value, Some(key.into())).await
    }

    pub async fn get_by_key<T: DeserializeOwned>(
        &self,
        store_name: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>> {
        let key = key.into();
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let value = session.store().get(&key).await;
        session.close();
        value?.map(decode).transpose()
    }

    /// Looks up a record by its numeric or textual id.
    pub async fn get_by_id<T: DeserializeOwned>(
        &self,
        store_name: &str,
        id: impl Into<Key>,
    ) -> Result<Option<T>> {
        self.get_by_key(store_name, id).await
    }

    /// Returns the first record whose `index_name` key equals `key`.
    pub async fn get_by_index<T: DeserializeOwned>(
        &self,
        store_name: &str,
        index_name: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>> {
        let key = key.into();
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let value = session.index(store_name, index_name)?.get(&key).await;
        session.close();
        value?.map(decode).transpose()
    }

    pub async fn get_all<T: DeserializeOwned>(&self, store_name: &str) -> Result<Vec<T>> {
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let values = session.store().get_all(&KeyRange::All).await;
        session.close();
        values?.into_iter().map(decode).collect()
    }

    /// Puts `value` and returns all records of the store once the transaction completed.
    pub async fn update<T: Serialize + DeserializeOwned>(
        &self,
        store_name: &str,
        value: &T,
        key: Option<Key>,
    ) -> Result<Vec<T>> {
        let value = serde_json::to_value(value)?;

        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let written = session.store().put(&value, key.as_ref());
        session.finish().await?;
        written.await?;

        self.get_all(store_name).await
    }

    /// Puts `value` under `key` and returns the stored record once the transaction completed.
    pub async fn update_by_key<T: Serialize + DeserializeOwned>(
        &self,
        store_name: &str,
        value: &T,
        key: impl Into<Key>,
    ) -> Result<Option<T>> {
        let key = key.into();
        let value = serde_json::to_value(value)?;

        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let written = session.store().put(&value, Some(&key));
        session.finish().await?;
        written.await?;

        self.get_by_key(store_name, key).await
    }

    /// Deletes the record at `key` and returns the remaining records.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        store_name: &str,
        key: impl Into<Key>,
    ) -> Result<Vec<T>> {
        self.delete_range(store_name, KeyRange::Only(key.into()))
            .await?;
        self.get_all(store_name).await
    }

    pub async fn delete_by_key(&self, store_name: &str, key: impl Into<Key>) -> Result<bool> {
        self.delete_range(store_name, KeyRange::Only(key.into()))
            .await?;
        Ok(true)
    }

    pub async fn clear(&self, store_name: &str) -> Result<bool> {
        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let cleared = session.store().clear();
        session.finish().await?;
        cleared.await?;
        Ok(true)
    }

    pub async fn count(&self, store_name: &str, range: impl Into<KeyRange>) -> Result<u64> {
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let count = session.store().count(&range.into()).await;
        session.close();
        count
    }

    /// Streams the records in `range`. The stream ends when the cursor is exhausted; dropping it
    /// early stops the iteration.
    pub async fn open_cursor<T: DeserializeOwned + SendUnlessWasm + 'static>(
        &self,
        store_name: &str,
        range: impl Into<KeyRange>,
        direction: QueryDirection,
    ) -> Result<PinnedStream<Result<CursorEntry<T>>>> {
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let cursor = session.store().open_cursor(&range.into(), direction);
        Ok(session.into_stream(cursor, decode_entry))
    }

    /// Streams the records of `store_name` in the order of `index_name`.
    pub async fn open_cursor_by_index<T: DeserializeOwned + SendUnlessWasm + 'static>(
        &self,
        store_name: &str,
        index_name: &str,
        range: impl Into<KeyRange>,
        direction: QueryDirection,
        mode: TransactionMode,
    ) -> Result<PinnedStream<Result<CursorEntry<T>>>> {
        let session = self.session(store_name, mode).await?;
        let cursor = session
            .index(store_name, index_name)?
            .open_cursor(&range.into(), direction);
        Ok(session.into_stream(cursor, decode_entry))
    }

    /// Collects the records whose `index_name` key lies in `range`, in index order.
    pub async fn get_all_by_index<T: DeserializeOwned>(
        &self,
        store_name: &str,
        index_name: &str,
        range: impl Into<KeyRange>,
    ) -> Result<Vec<T>> {
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let mut cursor = session
            .index(store_name, index_name)?
            .open_cursor(&range.into(), QueryDirection::Forward);

        let mut values = vec![];
        while let Some(entry) = cursor.next().await {
            values.push(decode(entry?.value.unwrap_or(Value::Null))?);
        }

        drop(cursor);
        session.close();
        Ok(values)
    }

    /// Collects the `(primary key, index key)` pairs of `index_name` in `range`.
    pub async fn get_all_keys_by_index(
        &self,
        store_name: &str,
        index_name: &str,
        range: impl Into<KeyRange>,
    ) -> Result<Vec<IndexKeyEntry>> {
        let session = self.session(store_name, TransactionMode::ReadOnly).await?;
        let mut cursor = session
            .index(store_name, index_name)?
            .open_key_cursor(&range.into(), QueryDirection::Forward);

        let mut entries = vec![];
        while let Some(entry) = cursor.next().await {
            let entry = entry?;
            entries.push(IndexKeyEntry {
                primary_key: entry.primary_key,
                key: entry.key,
            });
        }

        drop(cursor);
        session.close();
        Ok(entries)
    }

    /// Deletes the whole database. Fails with `Error::BlockedDelete` while other connections to
    /// it are open.
    #[instrument(skip(self), fields(name = %self.inner.name))]
    pub async fn delete_database(&self) -> Result<()> {
        let connection =
            open_database_if_exists(&self.inner.driver, &self.inner.name, self.version()).await?;
        connection.close();

        self.inner.driver.delete_database(&self.inner.name).await
    }

    async fn add_value(&self, store_name: &str, value: Value, key: Option<Key>) -> Result<Key> {
        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let key = session.store().add(&value, key.as_ref()).await;
        session.close();
        key
    }

    async fn delete_range(&self, store_name: &str, range: KeyRange) -> Result<()> {
        let session = self.session(store_name, TransactionMode::ReadWrite).await?;
        let deleted = session.store().delete(&range);
        session.finish().await?;
        deleted.await
    }

    async fn session(&self, store_name: &str, mode: TransactionMode) -> Result<Session<D>> {
        let connection =
            open_database_if_exists(&self.inner.driver, &self.inner.name, self.version()).await?;

        if !connection
            .store_names()
            .iter()
            .any(|name| name == store_name)
        {
            return Err(Error::StoreNotFound(store_name.to_string()));
        }

        let scope = begin(&connection, store_name, mode)?;
        Ok(Session { connection, scope })
    }
}

impl<D: Driver> SchemaAdmin<'_, D> {
    /// Creates `schema` by reopening the database at the next version. Returns the new version.
    #[instrument(skip_all, fields(store = %schema.name))]
    pub async fn create_object_store(
        &self,
        schema: StoreSchema,
        migration_factory: Option<MigrationFactory>,
    ) -> Result<u32> {
        let inner = &self.stash.inner;
        let _guard = inner.schema_lock.lock().await;

        let version = inner.version.load(Ordering::SeqCst) + 1;
        debug!("Reopening {} at version {}", inner.name, version);

        create_object_stores(
            &inner.driver,
            &inner.name,
            version,
            std::slice::from_ref(&schema),
            migration_factory,
        )
        .await?;

        inner.version.store(version, Ordering::SeqCst);
        info!("Created object store {}", schema.name);
        Ok(version)
    }
}

/// The on-disk version of `name`, or `None` if it doesn't exist or the engine can't tell.
async fn existing_version<D: Driver>(driver: &D, name: &str) -> Result<Option<u32>> {
    if !driver.is_available() {
        return Err(Error::StoreUnavailable);
    }

    match driver.databases().await {
        Ok(databases) => Ok(databases
            .into_iter()
            .find(|database| database.name == name)
            .map(|database| database.version)),
        Err(Error::FeatureUnsupported) => Ok(None),
        Err(err) => Err(err),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_entry<T: DeserializeOwned>(entry: RawCursorEntry) -> Result<CursorEntry<T>> {
    Ok(CursorEntry {
        key: entry.key,
        primary_key: entry.primary_key,
        value: decode(entry.value.unwrap_or(Value::Null))?,
    })
}
