//! Schema changes inside a version upgrade.
//!
//! An [`Upgrade`] only exists for the synchronous extent of the engine's
//! `upgradeneeded` event. Its schema calls are forwarded as they are and
//! return no future; the implicit version-change transaction commits on its
//! own once the callback returns and nothing else is pending.

use std::cell::RefCell;

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::connection::Connection;
use crate::error::Result;
use crate::native::{Backend, NativeDatabase, NativeStore, NativeTransaction, UpgradeNeeded};
use crate::store::ObjectStore;
use crate::transaction;
use crate::types::{IndexOptions, KeyPath, StoreOptions};

/// Shared completion future of a version-change transaction.
pub type UpgradeCompletion<B> = Shared<LocalBoxFuture<'static, Result<Connection<B>>>>;

/// The connection being upgraded, with schema operations.
pub struct Upgrade<B: Backend> {
    database: B::Database,
    transaction: B::Transaction,
    old_version: u32,
    new_version: u32,
}

impl<B: Backend> Upgrade<B> {
    pub(crate) fn new(event: UpgradeNeeded<B>) -> Self {
        Self {
            database: event.database,
            transaction: event.transaction,
            old_version: event.old_version,
            new_version: event.new_version,
        }
    }

    pub fn name(&self) -> String {
        self.database.name()
    }

    /// Version before the upgrade; 0 for a database that did not exist.
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.database.object_store_names()
    }

    pub fn create_object_store(
        &self,
        name: &str,
        options: StoreOptions,
    ) -> Result<StoreUpgrade<B>> {
        let store = self.database.create_object_store(name, &options)?;
        tracing::debug!(database = %self.database.name(), store = name, "created object store");
        Ok(StoreUpgrade::new(self.database.clone(), store))
    }

    /// An existing store, to change its indexes.
    pub fn object_store(&self, name: &str) -> Result<StoreUpgrade<B>> {
        let store = self.transaction.object_store(name)?;
        Ok(StoreUpgrade::new(self.database.clone(), store))
    }

    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        self.database.delete_object_store(name)?;
        tracing::debug!(database = %self.database.name(), store = name, "deleted object store");
        Ok(())
    }

    pub(crate) fn abort(&self) {
        if let Err(err) = self.transaction.abort() {
            tracing::debug!(error = %err, "upgrade transaction already finished");
        }
    }
}

/// A store created (or reopened) during an upgrade.
pub struct StoreUpgrade<B: Backend> {
    database: B::Database,
    native: B::Store,
    completion: RefCell<Option<UpgradeCompletion<B>>>,
}

impl<B: Backend> StoreUpgrade<B> {
    fn new(database: B::Database, native: B::Store) -> Self {
        Self {
            database,
            native,
            completion: RefCell::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.native.name()
    }

    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> Result<()> {
        self.native.create_index(name, &key_path.into(), &options)?;
        Ok(())
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.native.delete_index(name)?;
        Ok(())
    }

    /// Accessor to seed records from inside the upgrade.
    pub fn records(&self) -> ObjectStore<B> {
        ObjectStore::new(self.native.clone())
    }

    /// Resolves with a new [`Connection`] over the same native connection
    /// once the upgrade transaction completes, or rejects with its error.
    ///
    /// Created on first call, which has to happen inside the upgrade callback
    /// so the completion event is not missed; later calls return the same
    /// shared future. A first call after the upgrade has finished resolves
    /// with [`Error::Canceled`](crate::Error::Canceled).
    pub fn transaction(&self) -> UpgradeCompletion<B> {
        self.completion
            .borrow_mut()
            .get_or_insert_with(|| {
                let finished = transaction::listen::<B>(&self.native.transaction());
                let database = self.database.clone();
                async move {
                    finished.await.unwrap_or(Err(crate::Error::Canceled))?;
                    Ok(Connection::new(database))
                }
                .boxed_local()
                .shared()
            })
            .clone()
    }
}
