use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::schema::{DebugMigrationFactory, MigrationFactory, StoreSchema};
use crate::{Error, Result};

/// Describes the database a `KeyStash` manages. The declarative part (name, version and stores)
/// can be loaded from JSON, migration factories have to be attached in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub object_stores_meta: Vec<StoreSchema>,
    #[serde(skip)]
    pub migration_factory: Option<MigrationFactory>,
}

pub struct DbConfigBuilder {
    config: DbConfig,
}

impl DbConfig {
    pub fn builder(name: impl Into<String>, version: u32) -> DbConfigBuilder {
        DbConfigBuilder {
            config: DbConfig {
                name: name.into(),
                version,
                object_stores_meta: vec![],
                migration_factory: None,
            },
        }
    }

    /// Parses and validates a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DbConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration(
                "Please, provide the database name in the configuration".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(Error::Configuration(
                "Please, provide a database version greater 0 in the configuration".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_migration_factory(mut self, factory: MigrationFactory) -> Self {
        self.migration_factory = Some(factory);
        self
    }
}

impl DbConfigBuilder {
    pub fn object_store(mut self, schema: StoreSchema) -> Self {
        self.config.object_stores_meta.push(schema);
        self
    }

    pub fn migrations(mut self, factory: MigrationFactory) -> Self {
        self.config.migration_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<DbConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Debug for DbConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("object_stores_meta", &self.object_stores_meta)
            .field(
                "migration_factory",
                &DebugMigrationFactory(&self.migration_factory),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schema::{migration_factory, IndexSchema, Migrations};

    #[test]
    fn test_missing_name_is_a_configuration_error() {
        let result = DbConfig::builder("", 1).build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_missing_version_is_a_configuration_error() {
        let result = DbConfig::builder("app", 0).build();
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = DbConfig::from_json(r#"{ "name": "app" }"#);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_json() -> anyhow::Result<()> {
        let config = DbConfig::from_json(
            r#"{
                "name": "app",
                "version": 3,
                "objectStoresMeta": [
                    {
                        "name": "people",
                        "config": { "keyPath": "id", "autoIncrement": true },
                        "indexes": [{ "name": "name", "keyPath": "name" }]
                    }
                ]
            }"#,
        )?;

        assert_eq!(config.name, "app");
        assert_eq!(config.version, 3);
        assert_eq!(
            config.object_stores_meta,
            vec![StoreSchema::builder("people")
                .key_path("id")
                .auto_increment()
                .index(IndexSchema::builder("name", "name").build())
                .build()]
        );
        assert!(config.migration_factory.is_none());

        let config = config.with_migration_factory(migration_factory(Migrations::new));
        assert!(config.migration_factory.is_some());
        Ok(())
    }
}
