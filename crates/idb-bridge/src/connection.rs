//! Open database connections.

use std::cell::Cell;
use std::rc::Rc;

use futures::future::{self, FutureExt};

use crate::error::{Error, Result};
use crate::native::{Backend, NativeDatabase};
use crate::store::ObjectStore;
use crate::transaction::{self, IntoTransactionMode, StoreNames, Transaction, TransactionFuture};
use crate::types::TransactionMode;

/// Handle to an open database.
///
/// Cloning is cheap and every clone refers to the same native connection.
/// Any number of transactions can be opened from one connection.
pub struct Connection<B: Backend> {
    native: B::Database,
    closed: Rc<Cell<bool>>,
}

impl<B: Backend> Connection<B> {
    pub(crate) fn new(native: B::Database) -> Self {
        let name = native.name();
        native.set_error_listener(Box::new(move |err| {
            tracing::error!(database = %name, error = %err, "unhandled IndexedDB error");
        }));
        Self {
            native,
            closed: Rc::new(Cell::new(false)),
        }
    }

    pub fn name(&self) -> String {
        self.native.name()
    }

    pub fn version(&self) -> u32 {
        self.native.version()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.native.object_store_names()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Open a transaction over `stores` and run `setup` inside it,
    /// synchronously, before this call returns.
    ///
    /// The future resolves with `setup`'s return value once the transaction
    /// has completed. A returned [`Request`](crate::Request) is handed back
    /// as is rather than unwrapped, so reading its value takes a second
    /// `.await?`. All operations must be issued from inside `setup`;
    /// awaiting something unrelated first lets the engine close the
    /// transaction, and later operations fail with `TransactionInactiveError`.
    ///
    /// ```rust,ignore
    /// let saved = db
    ///     .transaction("my-store", TransactionMode::ReadWrite, |tx| {
    ///         tx.object_store("my-store")?.put(&value, Some(&key))
    ///     })
    ///     .await?   // transaction completed
    ///     .await?;  // put's own result (already settled)
    /// ```
    pub fn transaction<S, M, F, R>(&self, stores: S, mode: M, setup: F) -> TransactionFuture<R>
    where
        S: Into<StoreNames>,
        M: IntoTransactionMode,
        F: FnOnce(&Transaction<B>) -> Result<R>,
        R: 'static,
    {
        transaction::open::<B, _, _, _>(&self.native, stores.into(), mode, setup)
    }

    /// Single-store shortcut: `callback` receives the store accessor instead
    /// of the transaction. Rejects right away when given a list of stores.
    pub fn using_store<S, M, F, R>(&self, store: S, mode: M, callback: F) -> TransactionFuture<R>
    where
        S: Into<StoreNames>,
        M: IntoTransactionMode,
        F: FnOnce(&ObjectStore<B>) -> Result<R>,
        R: 'static,
    {
        let name = match store.into() {
            StoreNames::One(name) => name,
            StoreNames::Many(names) => {
                return future::err(Error::StoreNameRequired(names)).boxed_local()
            }
        };
        let store_name = name.clone();
        self.transaction(name, mode, move |tx| callback(&tx.object_store(&store_name)?))
    }

    pub fn using_read_only_store<S, F, R>(&self, store: S, callback: F) -> TransactionFuture<R>
    where
        S: Into<StoreNames>,
        F: FnOnce(&ObjectStore<B>) -> Result<R>,
        R: 'static,
    {
        self.using_store(store, TransactionMode::ReadOnly, callback)
    }

    pub fn using_read_write_store<S, F, R>(&self, store: S, callback: F) -> TransactionFuture<R>
    where
        S: Into<StoreNames>,
        F: FnOnce(&ObjectStore<B>) -> Result<R>,
        R: 'static,
    {
        self.using_store(store, TransactionMode::ReadWrite, callback)
    }

    /// Close the native connection. Idempotent; transactions already running
    /// finish, new ones are refused by the engine.
    pub fn close(&self) {
        if !self.closed.replace(true) {
            tracing::debug!(database = %self.native.name(), "closing connection");
            self.native.close();
        }
    }
}

impl<B: Backend> Clone for Connection<B> {
    fn clone(&self) -> Self {
        Self {
            native: self.native.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.native.name())
            .field("version", &self.native.version())
            .field("closed", &self.closed.get())
            .finish()
    }
}
