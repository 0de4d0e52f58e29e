use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use keystash::prelude::*;

use super::{async_test, notes_schema, people_schema, platform_driver, stores, Person};

fn recording_factory(log: Arc<Mutex<Vec<u32>>>) -> MigrationFactory {
    migration_factory(move || {
        let mut migrations = Migrations::new();
        for version in [5, 1, 3, 2] {
            let log = log.clone();
            migrations.insert(
                version,
                migration(move |event| {
                    log.lock().push(version);
                    if version == 3 {
                        event.tx.put(
                            stores::NOTES,
                            &json!("from migration 3"),
                            Some(&Key::from(3)),
                        )?;
                    }
                    Ok(())
                }),
            );
        }
        migrations
    })
}

#[async_test]
async fn test_migrations_run_in_ascending_order() -> Result<()> {
    let name = "test_migrations_run_in_ascending_order";
    let driver = platform_driver();
    driver.delete_database(name).await?;

    let log = Arc::new(Mutex::new(vec![]));

    let config = DbConfig::builder(name, 2)
        .object_store(notes_schema())
        .migrations(recording_factory(log.clone()))
        .build()?;
    let stash = KeyStash::open(driver.clone(), config).await?;
    assert_eq!(*log.lock(), vec![1, 2]);
    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 0);

    let config = DbConfig::builder(name, 5)
        .object_store(notes_schema())
        .migrations(recording_factory(log.clone()))
        .build()?;
    let stash = KeyStash::open(driver, config).await?;
    assert_eq!(*log.lock(), vec![1, 2, 3, 5]);
    assert_eq!(stash.version(), 5);
    assert_eq!(
        stash.get_by_key::<String>(stores::NOTES, 3).await?,
        Some("from migration 3".to_string())
    );

    Ok(())
}

#[async_test]
async fn test_store_creation_is_idempotent() -> Result<()> {
    let name = "test_store_creation_is_idempotent";
    let driver = platform_driver();
    driver.delete_database(name).await?;

    let config = DbConfig::builder(name, 1)
        .object_store(people_schema())
        .build()?;
    let stash = KeyStash::open(driver.clone(), config).await?;
    stash
        .add(stores::PEOPLE, &Person::new("Alice", 30), None)
        .await?;

    let config = DbConfig::builder(name, 2)
        .object_store(people_schema())
        .object_store(notes_schema())
        .build()?;
    let stash = KeyStash::open(driver, config).await?;

    assert_eq!(stash.count(stores::PEOPLE, KeyRange::All).await?, 1);
    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 0);
    Ok(())
}

#[async_test]
async fn test_reopening_at_lower_version_keeps_database() -> Result<()> {
    let name = "test_reopening_at_lower_version_keeps_database";
    let driver = platform_driver();
    driver.delete_database(name).await?;

    let config = DbConfig::builder(name, 2)
        .object_store(notes_schema())
        .build()?;
    let stash = KeyStash::open(driver.clone(), config).await?;
    stash
        .add(stores::NOTES, &json!("kept"), Some(Key::from(1)))
        .await?;

    for version in [1, 2] {
        let config = DbConfig::builder(name, version)
            .object_store(notes_schema())
            .build()?;
        let stash = KeyStash::open(driver.clone(), config).await?;

        assert_eq!(stash.version(), 2);
        assert_eq!(
            stash.get_by_key::<String>(stores::NOTES, 1).await?,
            Some("kept".to_string())
        );
    }
    Ok(())
}

#[async_test]
async fn test_duplicate_store_declarations_are_created_once() -> Result<()> {
    let name = "test_duplicate_store_declarations_are_created_once";
    let driver = platform_driver();
    driver.delete_database(name).await?;

    let config = DbConfig::builder(name, 1)
        .object_store(notes_schema())
        .object_store(notes_schema())
        .build()?;
    let stash = KeyStash::open(driver, config).await?;

    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 0);
    Ok(())
}

#[async_test]
async fn test_failing_migration_keeps_previous_version() -> Result<()> {
    let name = "test_failing_migration_keeps_previous_version";
    let driver = platform_driver();
    driver.delete_database(name).await?;

    let config = DbConfig::builder(name, 1)
        .object_store(notes_schema())
        .build()?;
    KeyStash::open(driver.clone(), config).await?;

    let config = DbConfig::builder(name, 2)
        .object_store(notes_schema())
        .object_store(people_schema())
        .migrations(migration_factory(|| {
            let mut migrations = Migrations::new();
            migrations.insert(
                2,
                migration(|_| Err(Error::Configuration("unsupported data".to_string()))),
            );
            migrations
        }))
        .build()?;
    let result = KeyStash::open(driver.clone(), config).await;
    assert!(matches!(result, Err(Error::Open(_))));

    let config = DbConfig::builder(name, 1)
        .object_store(notes_schema())
        .build()?;
    let stash = KeyStash::open(driver, config).await?;
    let result = stash.get_all::<Person>(stores::PEOPLE).await;
    assert!(matches!(result, Err(Error::StoreNotFound(store)) if store == stores::PEOPLE));
    Ok(())
}

#[async_test]
async fn test_admin_creates_store_at_next_version() -> Result<()> {
    let stash = super::stash("test_admin_creates_store_at_next_version").await?;
    assert_eq!(stash.version(), 1);

    let version = stash
        .admin()
        .create_object_store(StoreSchema::builder("tags").auto_increment().build(), None)
        .await?;

    assert_eq!(version, 2);
    assert_eq!(stash.version(), 2);

    let key = stash.add("tags", &json!("rust"), None).await?;
    assert_eq!(key, Key::from(1));
    assert_eq!(stash.count(stores::NOTES, KeyRange::All).await?, 0);
    Ok(())
}

#[async_test]
async fn test_invalid_configuration_fails_before_engine_access() -> Result<()> {
    let config = DbConfig {
        name: "test_invalid_configuration".to_string(),
        version: 0,
        object_stores_meta: vec![],
        migration_factory: None,
    };
    let result = KeyStash::open(platform_driver(), config).await;
    assert!(matches!(result, Err(Error::Configuration(_))));

    let result = DbConfig::builder("", 1).build();
    assert!(matches!(result, Err(Error::Configuration(_))));
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
#[async_test]
async fn test_unavailable_engine() -> Result<()> {
    let config = DbConfig::builder("db", 1).build()?;
    let result = KeyStash::open(MemoryDriver::unavailable(), config).await;
    assert!(matches!(result, Err(Error::StoreUnavailable)));
    Ok(())
}
