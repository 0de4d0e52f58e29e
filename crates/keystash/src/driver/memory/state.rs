use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::EngineError;
use crate::key::{Key, KeyPath, KeyRange};
use crate::schema::{IndexSchema, StoreConfig};

pub(super) type EngineResult<T> = std::result::Result<T, EngineError>;

pub(super) struct DatabaseState {
    pub name: String,
    pub version: u32,
    pub stores: BTreeMap<String, StoreData>,
    pub connections: usize,
}

#[derive(Clone)]
pub(super) struct StoreData {
    pub config: StoreConfig,
    pub indexes: BTreeMap<String, IndexSchema>,
    pub records: BTreeMap<Key, Value>,
    key_generator: i64,
}

/// Reverts a single change made by a transaction. Key generators are never reverted.
pub(super) enum UndoEntry {
    Record {
        store: String,
        key: Key,
        previous: Option<Value>,
    },
    CreatedStore(String),
    DeletedStore(String, StoreData),
    CreatedIndex {
        store: String,
        index: String,
    },
    DeletedIndex {
        store: String,
        index: IndexSchema,
    },
}

impl DatabaseState {
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseState {
            name: name.into(),
            version: 0,
            stores: Default::default(),
            connections: 0,
        }
    }

    pub fn store(&self, name: &str) -> EngineResult<&StoreData> {
        self.stores.get(name).ok_or_else(|| store_not_found(name))
    }

    fn store_mut(&mut self, name: &str) -> EngineResult<&mut StoreData> {
        self.stores.get_mut(name).ok_or_else(|| store_not_found(name))
    }

    /// Adds (or with `overwrite` puts) `value` into `store` and returns the record's key.
    pub fn write(
        &mut self,
        store: &str,
        value: &Value,
        key: Option<&Key>,
        overwrite: bool,
        undo: &mut Vec<UndoEntry>,
    ) -> EngineResult<Key> {
        let data = self.store_mut(store)?;
        let mut value = value.clone();
        let key = data.resolve_key(&mut value, key)?;

        if !overwrite && data.records.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "A record with key {key:?} already exists in object store {store}"
            )));
        }
        data.check_unique_indexes(&value, &key)?;

        let previous = data.records.insert(key.clone(), value);
        undo.push(UndoEntry::Record {
            store: store.to_string(),
            key: key.clone(),
            previous,
        });
        Ok(key)
    }

    pub fn delete(
        &mut self,
        store: &str,
        range: &KeyRange,
        undo: &mut Vec<UndoEntry>,
    ) -> EngineResult<()> {
        let data = self.store_mut(store)?;
        let keys = data
            .records
            .keys()
            .filter(|key| range.contains(key))
            .cloned()
            .collect::<Vec<_>>();

        for key in keys {
            let previous = data.records.remove(&key);
            undo.push(UndoEntry::Record {
                store: store.to_string(),
                key,
                previous,
            });
        }
        Ok(())
    }

    pub fn create_store(
        &mut self,
        name: &str,
        config: &StoreConfig,
        undo: &mut Vec<UndoEntry>,
    ) -> EngineResult<()> {
        if self.stores.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "An object store with the name {name} already exists"
            )));
        }

        let has_invalid_key_path = match &config.key_path {
            Some(KeyPath::Sequence(_)) => true,
            Some(KeyPath::Single(path)) => path.is_empty(),
            None => false,
        };
        if config.auto_increment && has_invalid_key_path {
            return Err(EngineError::new(
                "InvalidAccessError",
                "autoIncrement requires a non-empty, non-array key path",
            ));
        }

        self.stores
            .insert(name.to_string(), StoreData::new(config.clone()));
        undo.push(UndoEntry::CreatedStore(name.to_string()));
        Ok(())
    }

    pub fn delete_store(&mut self, name: &str, undo: &mut Vec<UndoEntry>) -> EngineResult<()> {
        let data = self.stores.remove(name).ok_or_else(|| store_not_found(name))?;
        undo.push(UndoEntry::DeletedStore(name.to_string(), data));
        Ok(())
    }

    pub fn create_index(
        &mut self,
        store: &str,
        index: &IndexSchema,
        undo: &mut Vec<UndoEntry>,
    ) -> EngineResult<()> {
        let data = self.store_mut(store)?;

        if data.indexes.contains_key(&index.name) {
            return Err(EngineError::constraint(format!(
                "An index with the name {} already exists on object store {store}",
                index.name
            )));
        }
        if index.options.multi_entry && matches!(index.key_path, KeyPath::Sequence(_)) {
            return Err(EngineError::new(
                "InvalidAccessError",
                "A multiEntry index cannot use an array key path",
            ));
        }
        if index.options.unique {
            let entries = data.index_entries(index);
            if entries.windows(2).any(|pair| pair[0].0 == pair[1].0) {
                return Err(EngineError::constraint(format!(
                    "Existing records violate the unique index {}",
                    index.name
                )));
            }
        }

        data.indexes.insert(index.name.clone(), index.clone());
        undo.push(UndoEntry::CreatedIndex {
            store: store.to_string(),
            index: index.name.clone(),
        });
        Ok(())
    }

    pub fn delete_index(
        &mut self,
        store: &str,
        index: &str,
        undo: &mut Vec<UndoEntry>,
    ) -> EngineResult<()> {
        let data = self.store_mut(store)?;
        let schema = data.indexes.remove(index).ok_or_else(|| {
            EngineError::not_found(format!(
                "Index {index} does not exist on object store {store}"
            ))
        })?;
        undo.push(UndoEntry::DeletedIndex {
            store: store.to_string(),
            index: schema,
        });
        Ok(())
    }

    pub fn rollback(&mut self, undo: Vec<UndoEntry>) {
        for entry in undo.into_iter().rev() {
            match entry {
                UndoEntry::Record {
                    store,
                    key,
                    previous,
                } => {
                    let Some(data) = self.stores.get_mut(&store) else {
                        continue;
                    };
                    match previous {
                        Some(value) => data.records.insert(key, value),
                        None => data.records.remove(&key),
                    };
                }
                UndoEntry::CreatedStore(name) => {
                    self.stores.remove(&name);
                }
                UndoEntry::DeletedStore(name, data) => {
                    self.stores.insert(name, data);
                }
                UndoEntry::CreatedIndex { store, index } => {
                    if let Some(data) = self.stores.get_mut(&store) {
                        data.indexes.remove(&index);
                    }
                }
                UndoEntry::DeletedIndex { store, index } => {
                    if let Some(data) = self.stores.get_mut(&store) {
                        data.indexes.insert(index.name.clone(), index);
                    }
                }
            }
        }
    }
}

impl StoreData {
    fn new(config: StoreConfig) -> Self {
        StoreData {
            config,
            indexes: Default::default(),
            records: Default::default(),
            key_generator: 1,
        }
    }

    /// Returns the `(index key, primary key)` pairs of `index`, sorted.
    pub fn index_entries(&self, index: &IndexSchema) -> Vec<(Key, Key)> {
        let mut entries = self
            .records
            .iter()
            .flat_map(|(primary_key, value)| {
                index_keys(index, value)
                    .into_iter()
                    .map(move |key| (key, primary_key.clone()))
            })
            .collect::<Vec<_>>();
        entries.sort();
        entries
    }

    fn resolve_key(&mut self, value: &mut Value, key: Option<&Key>) -> EngineResult<Key> {
        match (self.config.key_path.clone(), key) {
            (Some(_), Some(_)) => Err(EngineError::data(
                "The object store uses in-line keys and the key parameter was provided",
            )),
            (Some(key_path), None) => {
                if let Some(key) = key_path.evaluate(value) {
                    self.bump_key_generator(&key);
                    return Ok(key);
                }
                if !self.config.auto_increment {
                    return Err(EngineError::data(
                        "Evaluating the object store's key path did not yield a value",
                    ));
                }
                let key = self.generate_key();
                if !key_path.inject(value, &key) {
                    return Err(EngineError::data(
                        "The generated key could not be injected into the value",
                    ));
                }
                Ok(key)
            }
            (None, Some(key)) => {
                self.bump_key_generator(key);
                Ok(key.clone())
            }
            (None, None) if self.config.auto_increment => Ok(self.generate_key()),
            (None, None) => Err(EngineError::data(
                "The object store uses out-of-line keys and has no key generator and the key \
                 parameter was not provided",
            )),
        }
    }

    fn generate_key(&mut self) -> Key {
        let key = Key::Integer(self.key_generator);
        self.key_generator = self.key_generator.saturating_add(1);
        key
    }

    fn bump_key_generator(&mut self, key: &Key) {
        if !self.config.auto_increment {
            return;
        }
        let Some(number) = key.as_f64() else {
            return;
        };
        if number >= self.key_generator as f64 {
            self.key_generator = (number.floor() as i64).saturating_add(1);
        }
    }

    fn check_unique_indexes(&self, value: &Value, primary_key: &Key) -> EngineResult<()> {
        for index in self.indexes.values().filter(|index| index.options.unique) {
            let keys = index_keys(index, value);
            if keys.is_empty() {
                continue;
            }

            let conflict = self
                .records
                .iter()
                .filter(|(key, _)| *key != primary_key)
                .any(|(_, other)| {
                    index_keys(index, other)
                        .iter()
                        .any(|other_key| keys.contains(other_key))
                });

            if conflict {
                return Err(EngineError::constraint(format!(
                    "Unique index {} already contains the key",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

fn index_keys(index: &IndexSchema, value: &Value) -> Vec<Key> {
    if index.options.multi_entry {
        return index.key_path.evaluate_multi_entry(value);
    }
    index.key_path.evaluate(value).into_iter().collect()
}

fn store_not_found(name: &str) -> EngineError {
    EngineError::not_found(format!("Object store {name} does not exist"))
}
