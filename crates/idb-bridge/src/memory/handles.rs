//! Database, transaction, store and index handles of the memory engine.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use super::cursor::MemoryCursor;
use super::key::{Bounds, Key};
use super::state::{
    constraint_error, finished, invalid_state, not_found, Engine, Entry, Status, StoreState,
    TransactionState,
};
use super::{Memory, MemoryEngine, MemoryRequest};
use crate::error::NativeError;
use crate::native::{
    NativeDatabase, NativeIndex, NativeResult, NativeSource, NativeStore, NativeTransaction,
    TransactionListeners,
};
use crate::types::{CursorDirection, IndexOptions, KeyPath, Query, StoreOptions, TransactionMode};

/// One connection to a database.
#[derive(Clone)]
pub struct MemoryDatabase {
    engine: MemoryEngine,
    id: u64,
    name: String,
}

impl MemoryDatabase {
    pub(crate) fn new(engine: MemoryEngine, id: u64, name: String) -> Self {
        Self { engine, id, name }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn database_name(&self) -> String {
        self.name.clone()
    }

    /// The version-change transaction running on this connection, active.
    fn upgrade_transaction(&self, state: &Engine) -> NativeResult<u64> {
        let upgrade = state
            .connections
            .get(&self.id)
            .and_then(|connection| connection.upgrade)
            .ok_or_else(|| invalid_state("The database is not running a version change transaction."))?;
        state.active(upgrade)?;
        Ok(upgrade)
    }
}

impl NativeDatabase<Memory> for MemoryDatabase {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.engine
            .state()
            .connections
            .get(&self.id)
            .map(|connection| connection.version)
            .unwrap_or(0)
    }

    fn object_store_names(&self) -> Vec<String> {
        self.engine
            .state()
            .databases
            .get(&self.name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(&self, stores: &[String], mode: TransactionMode) -> NativeResult<MemoryTransaction> {
        let mut state = self.engine.state();
        let connection = state
            .connections
            .get(&self.id)
            .ok_or_else(|| invalid_state("The database connection is closing."))?;
        if connection.closed {
            return Err(invalid_state("The database connection is closing."));
        }
        if connection.upgrade.is_some() {
            return Err(invalid_state("A version change transaction is running."));
        }
        if mode == TransactionMode::VersionChange {
            return Err(NativeError::new(
                "TypeError",
                "The provided value 'versionchange' is not a valid transaction mode.",
            ));
        }
        if stores.is_empty() {
            return Err(NativeError::new(
                "InvalidAccessError",
                "The storeNames parameter was empty.",
            ));
        }
        let known = state
            .databases
            .get(&self.name)
            .map(|db| stores.iter().all(|store| db.stores.contains_key(store)))
            .unwrap_or(false);
        if !known {
            return Err(not_found("One of the specified object stores was not found."));
        }

        let mut scope = stores.to_vec();
        scope.sort();
        scope.dedup();

        let id = state.next_id();
        state.transactions.insert(
            id,
            TransactionState {
                connection: self.id,
                database: self.name.clone(),
                scope,
                mode,
                status: Status::Active,
                pending: 0,
                snapshot: None,
                on_complete: Vec::new(),
                on_error: Vec::new(),
                on_abort: Vec::new(),
            },
        );
        tracing::trace!(transaction = id, database = %self.name, %mode, "memory transaction created");
        Ok(MemoryTransaction::new(self.engine.clone(), id, self.name.clone(), mode))
    }

    fn create_object_store(&self, name: &str, options: &StoreOptions) -> NativeResult<MemoryStore> {
        let mut state = self.engine.state();
        let upgrade = self.upgrade_transaction(&state)?;
        let store = StoreState::new(options)?;
        let db = state
            .databases
            .get_mut(&self.name)
            .ok_or_else(|| not_found(format!("Database {} does not exist.", self.name)))?;
        if db.stores.contains_key(name) {
            return Err(constraint_error("An object store with the specified name already exists."));
        }
        db.stores.insert(name.to_string(), store);
        if let Some(transaction) = state.transactions.get_mut(&upgrade) {
            transaction.scope.push(name.to_string());
            transaction.scope.sort();
        }
        Ok(MemoryStore::new(Target {
            engine: self.engine.clone(),
            transaction: upgrade,
            mode: TransactionMode::VersionChange,
            source: Source::Store {
                database: self.name.clone(),
                store: name.to_string(),
            },
        }))
    }

    fn delete_object_store(&self, name: &str) -> NativeResult<()> {
        let mut state = self.engine.state();
        let upgrade = self.upgrade_transaction(&state)?;
        let removed = state
            .databases
            .get_mut(&self.name)
            .and_then(|db| db.stores.remove(name));
        if removed.is_none() {
            return Err(not_found(format!("No objectStore named {} in this database", name)));
        }
        if let Some(transaction) = state.transactions.get_mut(&upgrade) {
            transaction.scope.retain(|store| store != name);
        }
        Ok(())
    }

    fn set_error_listener(&self, listener: Box<dyn FnMut(NativeError)>) {
        if let Some(connection) = self.engine.state().connections.get_mut(&self.id) {
            connection.error_listener = Some(Rc::new(RefCell::new(listener)));
        }
    }

    fn close(&self) {
        self.engine.close_connection(self.id);
    }
}

/// A transaction of the memory engine.
#[derive(Clone)]
pub struct MemoryTransaction {
    engine: MemoryEngine,
    id: u64,
    database: String,
    mode: TransactionMode,
}

impl MemoryTransaction {
    pub(crate) fn new(engine: MemoryEngine, id: u64, database: String, mode: TransactionMode) -> Self {
        Self {
            engine,
            id,
            database,
            mode,
        }
    }
}

impl NativeTransaction<Memory> for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store_names(&self) -> Vec<String> {
        self.engine
            .state()
            .transactions
            .get(&self.id)
            .map(|transaction| transaction.scope.clone())
            .unwrap_or_default()
    }

    fn object_store(&self, name: &str) -> NativeResult<MemoryStore> {
        let state = self.engine.state();
        let transaction = state.transaction(self.id)?;
        if transaction.status == Status::Aborted {
            return Err(finished());
        }
        if !transaction.scope.iter().any(|store| store == name) {
            return Err(not_found(format!(
                "The object store '{}' is not in this transaction's scope.",
                name
            )));
        }
        Ok(MemoryStore::new(Target {
            engine: self.engine.clone(),
            transaction: self.id,
            mode: self.mode,
            source: Source::Store {
                database: self.database.clone(),
                store: name.to_string(),
            },
        }))
    }

    fn abort(&self) -> NativeResult<()> {
        self.engine.abort(self.id, None)
    }

    fn listen(&self, listeners: TransactionListeners) {
        let mut state = self.engine.state();
        let Some(transaction) = state.transactions.get_mut(&self.id) else {
            tracing::trace!(transaction = self.id, "listening to a finished memory transaction");
            return;
        };
        transaction.on_complete.push(listeners.on_complete);
        transaction.on_error.push(listeners.on_error);
        transaction.on_abort.push(listeners.on_abort);
    }
}

/// What a read or a cursor traverses.
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Store { database: String, store: String },
    Index { database: String, store: String, index: String },
}

impl Source {
    pub(crate) fn database(&self) -> &str {
        match self {
            Source::Store { database, .. } | Source::Index { database, .. } => database,
        }
    }

    pub(crate) fn store(&self) -> &str {
        match self {
            Source::Store { store, .. } | Source::Index { store, .. } => store,
        }
    }

    pub(crate) fn entries(&self, state: &Engine, bounds: &Bounds) -> NativeResult<Vec<Entry>> {
        match self {
            Source::Store { database, store } => Ok(state.store(database, store)?.entries(bounds)),
            Source::Index {
                database,
                store,
                index,
            } => {
                let index_state = state.index(database, store, index)?;
                Ok(state.store(database, store)?.index_entries(index_state, bounds))
            }
        }
    }
}

/// A source bound to one transaction.
#[derive(Clone)]
pub(crate) struct Target {
    pub engine: MemoryEngine,
    pub transaction: u64,
    pub mode: TransactionMode,
    pub source: Source,
}

impl Target {
    fn read<T: 'static>(
        &self,
        query: Option<&Query<Value>>,
        project: impl FnOnce(Vec<Entry>) -> T + 'static,
    ) -> NativeResult<MemoryRequest<T>> {
        self.engine.state().active(self.transaction)?;
        let bounds = Bounds::from_query(query)?;
        let source = self.source.clone();
        self.engine.issue(self.transaction, move |engine| {
            let state = engine.state();
            Ok(project(source.entries(&state, &bounds)?))
        })
    }

    fn get(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.read(Some(query), |entries| entries.into_iter().next().map(|entry| entry.value))
    }

    fn get_key(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.read(Some(query), |entries| {
            entries.into_iter().next().map(|entry| entry.primary_key.to_value())
        })
    }

    fn get_all(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.read(query, move |entries| {
            limit(entries, count).map(|entry| entry.value).collect()
        })
    }

    fn get_all_keys(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.read(query, move |entries| {
            limit(entries, count).map(|entry| entry.primary_key.to_value()).collect()
        })
    }

    fn count(&self, query: Option<&Query<Value>>) -> NativeResult<MemoryRequest<u32>> {
        self.read(query, |entries| u32::try_from(entries.len()).unwrap_or(u32::MAX))
    }

    fn cursor(
        &self,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
        keys_only: bool,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        MemoryCursor::open(self.clone(), query, direction, keys_only)
    }

    /// Check the transaction accepts writes, then queue `op` with a
    /// rollback snapshot in place.
    pub(crate) fn write<T: 'static>(
        &self,
        op: impl FnOnce(&mut StoreState) -> NativeResult<T> + 'static,
    ) -> NativeResult<MemoryRequest<T>> {
        self.engine.state().writable(self.transaction)?;
        let transaction = self.transaction;
        let database = self.source.database().to_string();
        let store = self.source.store().to_string();
        self.engine.issue(transaction, move |engine| {
            let mut state = engine.state();
            state.snapshot(transaction);
            op(state.store_mut(&database, &store)?)
        })
    }

    /// Schema changes need the version-change transaction, active.
    fn check_upgrade(&self, state: &Engine) -> NativeResult<()> {
        if self.mode != TransactionMode::VersionChange {
            return Err(invalid_state(
                "Indexes can only be changed during a version change transaction.",
            ));
        }
        state.active(self.transaction)?;
        Ok(())
    }
}

/// `count` of 0 or `None` means no limit.
fn limit(entries: Vec<Entry>, count: Option<u32>) -> impl Iterator<Item = Entry> {
    let take = match count {
        Some(0) | None => usize::MAX,
        Some(count) => count as usize,
    };
    entries.into_iter().take(take)
}

/// An object store bound to a transaction.
#[derive(Clone)]
pub struct MemoryStore {
    target: Target,
}

impl MemoryStore {
    pub(crate) fn new(target: Target) -> Self {
        Self { target }
    }

    fn with_store<T>(&self, read: impl FnOnce(&StoreState) -> T) -> Option<T> {
        let state = self.target.engine.state();
        state
            .store(self.target.source.database(), self.target.source.store())
            .ok()
            .map(read)
    }

    fn write_record(&self, value: &Value, key: Option<&Value>, overwrite: bool) -> NativeResult<MemoryRequest<Value>> {
        let explicit = {
            let state = self.target.engine.state();
            state.writable(self.target.transaction)?;
            state
                .store(self.target.source.database(), self.target.source.store())?
                .validate_write(value, key)?
        };
        let value = value.clone();
        self.target.write(move |store| {
            let key = store.write(value, explicit, overwrite)?;
            Ok(key.to_value())
        })
    }
}

impl NativeSource<Memory> for MemoryStore {
    fn get(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.target.get(query)
    }

    fn get_key(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.target.get_key(query)
    }

    fn get_all(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.target.get_all(query, count)
    }

    fn get_all_keys(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.target.get_all_keys(query, count)
    }

    fn count(&self, query: Option<&Query<Value>>) -> NativeResult<MemoryRequest<u32>> {
        self.target.count(query)
    }

    fn open_cursor(
        &self,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        self.target.cursor(query, direction, false)
    }

    fn open_key_cursor(
        &self,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        self.target.cursor(query, direction, true)
    }
}

impl NativeStore<Memory> for MemoryStore {
    fn name(&self) -> String {
        self.target.source.store().to_string()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.with_store(|store| store.key_path.clone()).flatten()
    }

    fn index_names(&self) -> Vec<String> {
        self.with_store(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn auto_increment(&self) -> bool {
        self.with_store(|store| store.auto_increment).unwrap_or(false)
    }

    fn add(&self, value: &Value, key: Option<&Value>) -> NativeResult<MemoryRequest<Value>> {
        self.write_record(value, key, false)
    }

    fn put(&self, value: &Value, key: Option<&Value>) -> NativeResult<MemoryRequest<Value>> {
        self.write_record(value, key, true)
    }

    fn delete(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<()>> {
        self.target.engine.state().writable(self.target.transaction)?;
        let bounds = Bounds::from_query(Some(query))?;
        self.target.write(move |store| {
            store.records.retain(|key, _| !bounds.contains(key));
            Ok(())
        })
    }

    fn clear(&self) -> NativeResult<MemoryRequest<()>> {
        self.target.write(|store| {
            store.records.clear();
            Ok(())
        })
    }

    fn index(&self, name: &str) -> NativeResult<MemoryIndex> {
        let state = self.target.engine.state();
        if state.transaction(self.target.transaction)?.status == Status::Aborted {
            return Err(finished());
        }
        let index = state.index(self.target.source.database(), self.target.source.store(), name)?;
        Ok(MemoryIndex::new(self.index_target(name), name, index.key_path.clone(), index.unique, index.multi_entry))
    }

    fn create_index(&self, name: &str, key_path: &KeyPath, options: &IndexOptions) -> NativeResult<MemoryIndex> {
        let mut state = self.target.engine.state();
        self.target.check_upgrade(&state)?;
        state
            .store_mut(self.target.source.database(), self.target.source.store())?
            .create_index(name, key_path, options)?;
        tracing::trace!(store = %self.target.source.store(), index = name, "memory index created");
        Ok(MemoryIndex::new(
            self.index_target(name),
            name,
            key_path.clone(),
            options.unique,
            options.multi_entry,
        ))
    }

    fn delete_index(&self, name: &str) -> NativeResult<()> {
        let mut state = self.target.engine.state();
        self.target.check_upgrade(&state)?;
        let store_name = self.target.source.store();
        let store = state.store_mut(self.target.source.database(), store_name)?;
        store
            .indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("No index named {} on object store {}", name, store_name)))
    }

    fn transaction(&self) -> MemoryTransaction {
        MemoryTransaction::new(
            self.target.engine.clone(),
            self.target.transaction,
            self.target.source.database().to_string(),
            self.target.mode,
        )
    }
}

impl MemoryStore {
    fn index_target(&self, index: &str) -> Target {
        Target {
            source: Source::Index {
                database: self.target.source.database().to_string(),
                store: self.target.source.store().to_string(),
                index: index.to_string(),
            },
            ..self.target.clone()
        }
    }
}

/// An index bound to a transaction. Properties are read when the handle is
/// created.
#[derive(Clone)]
pub struct MemoryIndex {
    target: Target,
    name: String,
    key_path: KeyPath,
    unique: bool,
    multi_entry: bool,
}

impl MemoryIndex {
    fn new(target: Target, name: &str, key_path: KeyPath, unique: bool, multi_entry: bool) -> Self {
        Self {
            target,
            name: name.to_string(),
            key_path,
            unique,
            multi_entry,
        }
    }
}

impl NativeSource<Memory> for MemoryIndex {
    fn get(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.target.get(query)
    }

    fn get_key(&self, query: &Query<Value>) -> NativeResult<MemoryRequest<Option<Value>>> {
        self.target.get_key(query)
    }

    fn get_all(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.target.get_all(query, count)
    }

    fn get_all_keys(&self, query: Option<&Query<Value>>, count: Option<u32>) -> NativeResult<MemoryRequest<Vec<Value>>> {
        self.target.get_all_keys(query, count)
    }

    fn count(&self, query: Option<&Query<Value>>) -> NativeResult<MemoryRequest<u32>> {
        self.target.count(query)
    }

    fn open_cursor(
        &self,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        self.target.cursor(query, direction, false)
    }

    fn open_key_cursor(
        &self,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        self.target.cursor(query, direction, true)
    }
}

impl NativeIndex<Memory> for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> KeyPath {
        self.key_path.clone()
    }

    fn unique(&self) -> bool {
        self.unique
    }

    fn multi_entry(&self) -> bool {
        self.multi_entry
    }
}

/// Primary key of a cursor position, checked against an in-line key path.
pub(crate) fn check_effective_key(store: &StoreState, value: &Value, primary_key: &Key) -> NativeResult<()> {
    if let Some(key_path) = &store.key_path {
        match super::key::extract(value, key_path) {
            Some(key) if &key == primary_key => {}
            _ => {
                return Err(NativeError::new(
                    "DataError",
                    "The effective key of the new value does not match the primary key.",
                ))
            }
        }
    }
    Ok(())
}
