// keystash/keystash-integration-tests
//
// Copyright: 2023, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

mod cursor;
mod migrations;
mod operations;

use anyhow::Result;
use keystash::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::test as async_test;
#[cfg(target_arch = "wasm32")]
pub use wasm_bindgen_test::wasm_bindgen_test as async_test;

pub mod stores {
    pub const PEOPLE: &str = "people";
    pub const NOTES: &str = "notes";

    pub mod people {
        pub const EMAIL: &str = "email";
        pub const AGE: &str = "age";
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub age: u32,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            age,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

pub fn people_schema() -> StoreSchema {
    StoreSchema::builder(stores::PEOPLE)
        .key_path("id")
        .auto_increment()
        .index(
            IndexSchema::builder(stores::people::EMAIL, "email")
                .unique()
                .build(),
        )
        .index(IndexSchema::builder(stores::people::AGE, "age").build())
        .build()
}

pub fn notes_schema() -> StoreSchema {
    StoreSchema::builder(stores::NOTES).build()
}

#[cfg(target_arch = "wasm32")]
pub fn platform_driver() -> IndexedDBDriver {
    IndexedDBDriver::new()
}

#[cfg(not(target_arch = "wasm32"))]
pub fn platform_driver() -> MemoryDriver {
    MemoryDriver::new()
}

/// Opens a fresh database named `name` with the people and notes stores.
async fn stash(name: &str) -> Result<KeyStash<PlatformDriver>> {
    let driver = platform_driver();
    // Browser databases outlive a test run.
    driver.delete_database(name).await?;

    let config = DbConfig::builder(name, 1)
        .object_store(people_schema())
        .object_store(notes_schema())
        .build()?;

    Ok(KeyStash::open(driver, config).await?)
}
