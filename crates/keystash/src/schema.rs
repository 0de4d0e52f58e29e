use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::driver::VersionChangeEvent;
use crate::key::KeyPath;
use crate::Result;

/// Declares one object store together with its indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    #[serde(default)]
    pub config: StoreConfig,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub key_path: Option<KeyPath>,
    #[serde(default)]
    pub auto_increment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub options: IndexOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

pub struct StoreSchemaBuilder {
    name: String,
    config: StoreConfig,
    indexes: Vec<IndexSchema>,
}

pub struct IndexSchemaBuilder {
    name: String,
    key_path: KeyPath,
    options: IndexOptions,
}

impl StoreSchema {
    pub fn builder(name: impl Into<String>) -> StoreSchemaBuilder {
        StoreSchemaBuilder {
            name: name.into(),
            config: Default::default(),
            indexes: vec![],
        }
    }
}

impl StoreSchemaBuilder {
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.config.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.config.auto_increment = true;
        self
    }

    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> StoreSchema {
        StoreSchema {
            name: self.name,
            config: self.config,
            indexes: self.indexes,
        }
    }
}

impl IndexSchema {
    /// Creates a new index named `name` over the records' `key_path`.
    pub fn builder(name: impl Into<String>, key_path: impl Into<KeyPath>) -> IndexSchemaBuilder {
        IndexSchemaBuilder {
            name: name.into(),
            key_path: key_path.into(),
            options: Default::default(),
        }
    }
}

impl IndexSchemaBuilder {
    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.options.multi_entry = true;
        self
    }

    pub fn build(self) -> IndexSchema {
        IndexSchema {
            name: self.name,
            key_path: self.key_path,
            options: self.options,
        }
    }
}

/// A single migration step. It runs inside the version change transaction when the database is
/// upgraded from a version lower than the step's version.
pub type MigrationStep = Arc<dyn Fn(&VersionChangeEvent<'_>) -> Result<()> + Send + Sync>;

/// Migration steps keyed by the schema version they migrate to.
pub type Migrations = BTreeMap<u32, MigrationStep>;

pub type MigrationFactory = Arc<dyn Fn() -> Migrations + Send + Sync>;

pub fn migration<F>(step: F) -> MigrationStep
where
    F: Fn(&VersionChangeEvent<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(step)
}

pub fn migration_factory<F>(factory: F) -> MigrationFactory
where
    F: Fn() -> Migrations + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Returns the migration steps that have to run when upgrading from `old_version`, in ascending
/// version order.
pub fn pending_migrations(
    migrations: &Migrations,
    old_version: u32,
) -> impl Iterator<Item = (u32, &MigrationStep)> {
    migrations
        .range((Bound::Excluded(old_version), Bound::Unbounded))
        .map(|(version, step)| (*version, step))
}

pub(crate) struct DebugMigrationFactory<'a>(pub &'a Option<MigrationFactory>);

impl Debug for DebugMigrationFactory<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Some(<migration factory>)"),
            None => f.write_str("None"),
        }
    }
}
