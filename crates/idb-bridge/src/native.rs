//! Native engine boundary.
//!
//! The bridging layer never talks to a storage engine directly. It talks to the
//! traits in this module, which describe the event-driven surface of a
//! transactional object-store engine:
//!
//! - requests fire exactly one `success` or `error` (cursor requests fire again
//!   after every `continue`/`advance`), optionally preceded by `blocked` or,
//!   for opens, `upgradeneeded`;
//! - transactions fire `complete`, or `error` and/or `abort`;
//! - a transaction goes inactive as soon as control returns to the event loop
//!   without a new request having been issued against it.
//!
//! Synchronous engine calls return `NativeResult`, mirroring the exceptions a
//! browser throws (`ReadOnlyError`, `TransactionInactiveError`, ...).
//!
//! Backends: [`crate::memory::Memory`] on every target, `crate::web::Web` on
//! `wasm32`.

use std::fmt;

use crate::error::{NativeError, Result};
use crate::types::{CursorDirection, IndexOptions, KeyPath, Query, StoreOptions, TransactionMode};

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Bundles the handle types of one engine implementation.
pub trait Backend: Sized + 'static {
    /// Structured-clone value (and key) representation.
    type Value: Clone + fmt::Debug + 'static;
    type Database: NativeDatabase<Self>;
    type Transaction: NativeTransaction<Self>;
    type Store: NativeStore<Self>;
    type Index: NativeIndex<Self>;
    type Cursor: NativeCursor<Self>;
    type Request<T: 'static>: NativeRequest<Self, T>;
}

type FactoryRequest<F, T> = <<F as NativeFactory>::Backend as Backend>::Request<T>;
type FactoryDatabase<F> = <<F as NativeFactory>::Backend as Backend>::Database;

/// Entry point of an engine (`indexedDB` in a browser).
pub trait NativeFactory {
    type Backend: Backend;

    /// Fails with [`crate::Error::NotAvailable`] when the environment has no engine.
    fn ensure_available(&self) -> Result<()>;

    /// `None` opens the current version, or version 1 for a new database.
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> NativeResult<FactoryRequest<Self, FactoryDatabase<Self>>>;

    fn delete_database(&self, name: &str) -> NativeResult<FactoryRequest<Self, ()>>;
}

/// Payload of an `upgradeneeded` event.
pub struct UpgradeNeeded<B: Backend> {
    pub database: B::Database,
    /// The implicit version-change transaction.
    pub transaction: B::Transaction,
    pub old_version: u32,
    pub new_version: u32,
}

/// Payload of a `blocked` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocked {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

/// Every listener a request can fire. Attached in a single
/// [`NativeRequest::listen`] call so none can be missed.
pub struct Listeners<B: Backend, T> {
    pub on_success: Box<dyn FnMut(T)>,
    pub on_error: Box<dyn FnMut(NativeError)>,
    pub on_blocked: Box<dyn FnMut(Blocked)>,
    pub on_upgrade_needed: Option<Box<dyn FnMut(UpgradeNeeded<B>)>>,
}

pub trait NativeRequest<B: Backend, T>: 'static {
    fn listen(&self, listeners: Listeners<B, T>);
}

/// Terminal events of a transaction. `error` may be followed by `abort`.
pub struct TransactionListeners {
    pub on_complete: Box<dyn FnOnce()>,
    pub on_error: Box<dyn FnOnce(NativeError)>,
    pub on_abort: Box<dyn FnOnce(Option<NativeError>)>,
}

pub trait NativeDatabase<B: Backend>: Clone + 'static {
    fn name(&self) -> String;
    fn version(&self) -> u32;
    fn object_store_names(&self) -> Vec<String>;
    fn transaction(&self, stores: &[String], mode: TransactionMode)
        -> NativeResult<B::Transaction>;
    /// Only valid inside an upgrade.
    fn create_object_store(&self, name: &str, options: &StoreOptions) -> NativeResult<B::Store>;
    /// Only valid inside an upgrade.
    fn delete_object_store(&self, name: &str) -> NativeResult<()>;
    /// Replaces the listener for errors bubbling up from transactions.
    fn set_error_listener(&self, listener: Box<dyn FnMut(NativeError)>);
    fn close(&self);
}

pub trait NativeTransaction<B: Backend>: Clone + 'static {
    fn mode(&self) -> TransactionMode;
    fn object_store_names(&self) -> Vec<String>;
    fn object_store(&self, name: &str) -> NativeResult<B::Store>;
    fn abort(&self) -> NativeResult<()>;
    /// May be called more than once; every listener set is notified.
    fn listen(&self, listeners: TransactionListeners);
}

/// Read operations shared by object stores and indexes.
pub trait NativeSource<B: Backend>: Clone + 'static {
    fn get(&self, query: &Query<B::Value>) -> NativeResult<B::Request<Option<B::Value>>>;
    fn get_key(&self, query: &Query<B::Value>) -> NativeResult<B::Request<Option<B::Value>>>;
    fn get_all(
        &self,
        query: Option<&Query<B::Value>>,
        count: Option<u32>,
    ) -> NativeResult<B::Request<Vec<B::Value>>>;
    fn get_all_keys(
        &self,
        query: Option<&Query<B::Value>>,
        count: Option<u32>,
    ) -> NativeResult<B::Request<Vec<B::Value>>>;
    fn count(&self, query: Option<&Query<B::Value>>) -> NativeResult<B::Request<u32>>;
    fn open_cursor(
        &self,
        query: Option<&Query<B::Value>>,
        direction: CursorDirection,
    ) -> NativeResult<B::Request<Option<B::Cursor>>>;
    fn open_key_cursor(
        &self,
        query: Option<&Query<B::Value>>,
        direction: CursorDirection,
    ) -> NativeResult<B::Request<Option<B::Cursor>>>;
}

pub trait NativeStore<B: Backend>: NativeSource<B> {
    fn name(&self) -> String;
    fn key_path(&self) -> Option<KeyPath>;
    fn index_names(&self) -> Vec<String>;
    fn auto_increment(&self) -> bool;
    fn add(&self, value: &B::Value, key: Option<&B::Value>)
        -> NativeResult<B::Request<B::Value>>;
    fn put(&self, value: &B::Value, key: Option<&B::Value>)
        -> NativeResult<B::Request<B::Value>>;
    fn delete(&self, query: &Query<B::Value>) -> NativeResult<B::Request<()>>;
    fn clear(&self) -> NativeResult<B::Request<()>>;
    fn index(&self, name: &str) -> NativeResult<B::Index>;
    /// Only valid inside an upgrade.
    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        options: &IndexOptions,
    ) -> NativeResult<B::Index>;
    /// Only valid inside an upgrade.
    fn delete_index(&self, name: &str) -> NativeResult<()>;
    /// The transaction this store handle belongs to.
    fn transaction(&self) -> B::Transaction;
}

pub trait NativeIndex<B: Backend>: NativeSource<B> {
    fn name(&self) -> String;
    fn key_path(&self) -> KeyPath;
    fn unique(&self) -> bool;
    fn multi_entry(&self) -> bool;
}

/// Cursor positioned on one record. Key, primary key and value are read at
/// the step that produced the handle.
pub trait NativeCursor<B: Backend>: Clone + 'static {
    fn direction(&self) -> CursorDirection;
    fn key(&self) -> B::Value;
    fn primary_key(&self) -> B::Value;
    /// `None` for key-only cursors.
    fn value(&self) -> Option<B::Value>;
    /// Re-arms the cursor request; `key` skips ahead to that key.
    fn continue_(&self, key: Option<&B::Value>) -> NativeResult<()>;
    fn advance(&self, count: u32) -> NativeResult<()>;
    fn update(&self, value: &B::Value) -> NativeResult<B::Request<B::Value>>;
    fn delete(&self) -> NativeResult<B::Request<()>>;
}
