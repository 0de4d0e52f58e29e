pub use crate::driver::memory::MemoryDriver;
pub use crate::driver::{
    Connection, DatabaseInfo, Driver, Index, ObjectStore, Transaction, TransactionMode,
    TransactionOutcome, UpgradeTransaction, VersionChangeEvent,
};
pub use crate::{
    migration, migration_factory, BulkItem, CursorEntry, DbConfig, EngineError, Error,
    IndexKeyEntry, IndexSchema, Key, KeyPath, KeyRange, KeyStash, MigrationFactory, Migrations,
    QueryDirection, StoreConfig, StoreSchema,
};

#[cfg(target_arch = "wasm32")]
pub use crate::driver::indexed_db::IndexedDBDriver;

#[cfg(target_arch = "wasm32")]
pub use IndexedDBDriver as PlatformDriver;
#[cfg(not(target_arch = "wasm32"))]
pub use MemoryDriver as PlatformDriver;
