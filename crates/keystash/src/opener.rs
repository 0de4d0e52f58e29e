use tracing::{debug, instrument};

use crate::driver::{Connection, Driver, UpgradeHandler};
use crate::{Error, Result};

/// Opens `name` at `version`. If the database is created or its version increased, `on_upgrade`
/// runs inside the version change transaction before this function returns.
#[instrument(skip(driver, on_upgrade))]
pub async fn open_database<D: Driver>(
    driver: &D,
    name: &str,
    version: u32,
    on_upgrade: Option<UpgradeHandler>,
) -> Result<D::Connection> {
    if !driver.is_available() {
        return Err(Error::StoreUnavailable);
    }
    if version == 0 {
        return Err(Error::Configuration(
            "The database version must be greater than 0".to_string(),
        ));
    }

    let connection = driver.open(name, version, on_upgrade).await?;
    debug!("Opened {} at version {}", connection.name(), connection.version());
    Ok(connection)
}

/// Opens `name` at `version` but fails with `Error::DatabaseNotFound` instead of creating the
/// database when it doesn't exist yet.
pub async fn open_database_if_exists<D: Driver>(
    driver: &D,
    name: &str,
    version: u32,
) -> Result<D::Connection> {
    if !driver.is_available() {
        return Err(Error::StoreUnavailable);
    }

    let databases = driver.databases().await?;
    if !databases.iter().any(|database| database.name == name) {
        return Err(Error::DatabaseNotFound(name.to_string()));
    }

    open_database(driver, name, version, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;

    #[tokio::test]
    async fn test_open_if_exists_does_not_create_databases() -> anyhow::Result<()> {
        let driver = MemoryDriver::new();

        let result = open_database_if_exists(&driver, "missing", 1).await;
        assert!(matches!(result, Err(Error::DatabaseNotFound(name)) if name == "missing"));
        assert!(driver.databases().await?.is_empty());

        open_database(&driver, "missing", 1, None).await?;
        let connection = open_database_if_exists(&driver, "missing", 1).await?;
        assert_eq!(connection.version(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_fails_fast() {
        let result = open_database(&MemoryDriver::unavailable(), "db", 1, None).await;
        assert!(matches!(result, Err(Error::StoreUnavailable)));

        let result = open_database(&MemoryDriver::new(), "db", 0, None).await;
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result =
            open_database_if_exists(&MemoryDriver::without_database_enumeration(), "db", 1).await;
        assert!(matches!(result, Err(Error::FeatureUnsupported)));
    }
}
