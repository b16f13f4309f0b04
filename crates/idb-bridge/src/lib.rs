//! Future-based bridge over the IndexedDB event model
//!
//! IndexedDB reports every outcome through events: requests fire `success` or
//! `error`, transactions fire `complete` or `abort`, cursors fire once per
//! record. This crate turns each of those into something awaitable while
//! keeping the engine's transaction lifetime rules intact.
//!
//! The bridge never talks to an engine directly, only to the traits in
//! [`native`]. Two engines implement them: the browser's, through web-sys
//! (`wasm32` only, see `web`), and [`MemoryEngine`], an in-process engine with
//! the same event model that runs on every target.
//!
//! # Transactions
//!
//! A transaction stays active only while the code that created it runs. All
//! work therefore happens inside a synchronous setup callback, and the
//! returned future resolves once the transaction has completed:
//!
//! ```rust,ignore
//! use idb_bridge::{open_database, using_database, StoreOptions, TransactionMode};
//!
//! let engine = idb_bridge::MemoryEngine::new();
//! let db = open_database(&engine, "app")
//!     .version(1)
//!     .on_upgrade(|upgrade| {
//!         upgrade.create_object_store("users", StoreOptions::new().key_path("id"))?;
//!         Ok(())
//!     });
//!
//! let name = engine.block_on(using_database(db, |db| async move {
//!     let user = db
//!         .using_read_write_store("users", |users| {
//!             users.put(&json!({ "id": 1, "name": "Ada" }), None)?;
//!             users.get(json!(1))
//!         })
//!         .await?
//!         .await?;
//!     Ok(user.map(|user| user["name"].clone()))
//! }))?;
//! ```

pub mod config;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod error;
pub mod memory;
pub mod native;
pub mod request;
pub mod store;
pub mod transaction;
pub mod types;
pub mod upgrade;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::{DatabaseConfig, IndexConfig, StoreConfig};
pub use connection::Connection;
pub use cursor::{Cursor, CursorErrors};
pub use database::{delete_database, open_database, using_database, OpenDatabase};
pub use error::{Error, NativeError, Result};
pub use memory::{Memory, MemoryEngine};
pub use native::{Backend, NativeFactory};
pub use request::Request;
pub use store::{Index, ObjectStore};
pub use transaction::{IntoTransactionMode, StoreNames, Transaction, TransactionFuture};
pub use types::{CursorDirection, IndexOptions, KeyPath, KeyRange, Query, StoreOptions, TransactionMode};
pub use upgrade::{StoreUpgrade, Upgrade, UpgradeCompletion};
#[cfg(target_arch = "wasm32")]
pub use web::{Web, WebFactory};
