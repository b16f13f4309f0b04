//! Declarative database schema.
//!
//! ```json
//! {
//!   "name": "app",
//!   "version": 2,
//!   "stores": [
//!     { "name": "users", "key_path": "id", "indexes": [
//!       { "name": "email", "key_path": "email", "unique": true }
//!     ] },
//!     { "name": "log", "auto_increment": true }
//!   ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::database::{open_database, OpenDatabase};
use crate::error::{Error, Result};
use crate::native::{Backend, NativeFactory};
use crate::types::{IndexOptions, KeyPath, StoreOptions};
use crate::upgrade::Upgrade;

/// A database and the stores it should contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    /// Omitted: open the current version, or 1 for a new database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    #[serde(flatten)]
    pub options: StoreOptions,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(flatten)]
    pub options: IndexOptions,
}

impl DatabaseConfig {
    /// Parse and validate a JSON schema.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("database name is empty".to_string()));
        }
        if self.version == Some(0) {
            return Err(Error::Config(format!("database {}: version must be at least 1", self.name)));
        }
        let mut stores = HashSet::new();
        for store in &self.stores {
            if !stores.insert(store.name.as_str()) {
                return Err(Error::Config(format!("duplicate store {}", store.name)));
            }
            let mut indexes = HashSet::new();
            for index in &store.indexes {
                if !indexes.insert(index.name.as_str()) {
                    return Err(Error::Config(format!(
                        "duplicate index {} on store {}",
                        index.name, store.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create the stores and indexes the database does not have yet.
    /// Existing ones are left untouched, even when their options differ.
    pub fn apply<B: Backend>(&self, upgrade: &Upgrade<B>) -> Result<()> {
        let existing = upgrade.object_store_names();
        for store in &self.stores {
            let handle = if existing.contains(&store.name) {
                upgrade.object_store(&store.name)?
            } else {
                upgrade.create_object_store(&store.name, store.options.clone())?
            };

            let indexes = handle.records().index_names();
            for index in &store.indexes {
                if indexes.contains(&index.name) {
                    continue;
                }
                handle.create_index(&index.name, index.key_path.clone(), index.options)?;
                tracing::debug!(store = %store.name, index = %index.name, "created index");
            }
        }
        Ok(())
    }

    /// Open the database, applying this schema when an upgrade runs.
    pub fn open<'a, F: NativeFactory>(&self, factory: &'a F) -> OpenDatabase<'a, F> {
        let config = self.clone();
        let open = open_database(factory, &self.name).on_upgrade(move |upgrade| config.apply(upgrade));
        match self.version {
            Some(version) => open.version(version),
            None => open,
        }
    }
}
