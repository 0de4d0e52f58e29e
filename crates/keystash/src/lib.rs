pub use config::{DbConfig, DbConfigBuilder};
pub use error::{EngineError, Error, Result};
pub use key::{Key, KeyPath, KeyRange, QueryDirection};
pub use opener::{open_database, open_database_if_exists};
pub use reconciler::{create_object_stores, SchemaReconciler};
pub use schema::{
    migration, migration_factory, pending_migrations, IndexOptions, IndexSchema, MigrationFactory,
    MigrationStep, Migrations, StoreConfig, StoreSchema,
};
pub use stash::{BulkItem, CursorEntry, IndexKeyEntry, KeyStash, SchemaAdmin};
pub use transaction::{begin, TransactionScope};

mod config;
pub mod driver;
mod error;
mod key;
mod opener;
pub mod prelude;
mod reconciler;
mod schema;
mod stash;
mod transaction;
