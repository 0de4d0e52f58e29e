use tracing::{debug, info};

use crate::driver::{Connection, Driver, UpgradeHandler, VersionChangeEvent};
use crate::opener::open_database;
use crate::schema::{pending_migrations, MigrationFactory, StoreSchema};
use crate::Result;

/// Brings a database's schema in line with its declaration while it is being upgraded.
pub struct SchemaReconciler {
    schemas: Vec<StoreSchema>,
    migration_factory: Option<MigrationFactory>,
}

impl SchemaReconciler {
    pub fn new(schemas: Vec<StoreSchema>, migration_factory: Option<MigrationFactory>) -> Self {
        SchemaReconciler {
            schemas,
            migration_factory,
        }
    }

    /// Creates the declared stores (and their indexes) that don't exist yet, then runs the
    /// migrations newer than `event.old_version` in ascending order.
    pub fn reconcile(&self, event: &VersionChangeEvent<'_>) -> Result<()> {
        for schema in &self.schemas {
            // Re-read on every iteration, a store may be declared more than once.
            if event.tx.store_names().contains(&schema.name) {
                continue;
            }

            event.tx.create_object_store(&schema.name, &schema.config)?;
            info!("Created object store {}", schema.name);

            for index in &schema.indexes {
                event.tx.create_index(&schema.name, index)?;
                debug!("Created index {} on {}", index.name, schema.name);
            }
        }

        let Some(migration_factory) = &self.migration_factory else {
            return Ok(());
        };

        let migrations = migration_factory();
        for (version, step) in pending_migrations(&migrations, event.old_version) {
            info!("Running migration for version {}", version);
            step(event)?;
        }

        Ok(())
    }

    pub fn into_upgrade_handler(self) -> UpgradeHandler {
        Box::new(move |event: &VersionChangeEvent<'_>| self.reconcile(event))
    }
}

/// Opens `name` at `version` with the schema reconciler as upgrade handler and closes the
/// connection again once the upgrade succeeded.
pub async fn create_object_stores<D: Driver>(
    driver: &D,
    name: &str,
    version: u32,
    schemas: &[StoreSchema],
    migration_factory: Option<MigrationFactory>,
) -> Result<()> {
    let reconciler = SchemaReconciler::new(schemas.to_vec(), migration_factory);
    let connection = open_database(
        driver,
        name,
        version,
        Some(reconciler.into_upgrade_handler()),
    )
    .await?;
    connection.close();
    Ok(())
}
