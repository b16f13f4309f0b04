//! Engine state: databases, connections, transactions and the task queue.
//!
//! Nothing here calls back into user code. Handles borrow the state, read or
//! mutate it, release the borrow and only then fire listeners.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::cell::RefCell;

use serde_json::Value;

use super::key::{self, Bounds, Key};
use super::MemoryEngine;
use crate::error::NativeError;
use crate::native::NativeResult;
use crate::types::{IndexOptions, KeyPath, StoreOptions, TransactionMode};

pub(crate) type Task = Box<dyn FnOnce(&MemoryEngine)>;
pub(crate) type ErrorListener = Rc<RefCell<Box<dyn FnMut(NativeError)>>>;

/// Largest value a key generator may produce.
const MAX_GENERATED_KEY: u64 = 1 << 53;

pub(crate) fn not_found(message: impl Into<String>) -> NativeError {
    NativeError::new("NotFoundError", message)
}

pub(crate) fn invalid_state(message: impl Into<String>) -> NativeError {
    NativeError::new("InvalidStateError", message)
}

pub(crate) fn data_error(message: impl Into<String>) -> NativeError {
    NativeError::new("DataError", message)
}

pub(crate) fn constraint_error(message: impl Into<String>) -> NativeError {
    NativeError::new("ConstraintError", message)
}

pub(crate) fn inactive() -> NativeError {
    NativeError::new("TransactionInactiveError", "The transaction is not active.")
}

pub(crate) fn read_only() -> NativeError {
    NativeError::new("ReadOnlyError", "The transaction is read-only.")
}

pub(crate) fn finished() -> NativeError {
    invalid_state("The transaction has finished.")
}

pub(crate) fn aborted() -> NativeError {
    NativeError::new("AbortError", "The transaction was aborted.")
}

#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexState {
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        key::index_keys(value, &self.key_path, self.multi_entry)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    next_key: u64,
    pub records: BTreeMap<Key, Value>,
    pub indexes: BTreeMap<String, IndexState>,
}

impl StoreState {
    pub(crate) fn new(options: &StoreOptions) -> NativeResult<Self> {
        if options.auto_increment {
            let invalid = match &options.key_path {
                Some(KeyPath::Single(path)) => path.is_empty(),
                Some(KeyPath::Compound(_)) => true,
                None => false,
            };
            if invalid {
                return Err(NativeError::new(
                    "InvalidAccessError",
                    "An auto-increment store cannot have an empty or compound key path.",
                ));
            }
        }
        Ok(Self {
            key_path: options.key_path.clone(),
            auto_increment: options.auto_increment,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        })
    }

    /// Synchronous checks of `add`/`put`. Returns the parsed explicit key.
    pub(crate) fn validate_write(&self, value: &Value, key: Option<&Value>) -> NativeResult<Option<Key>> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(data_error(
                "The object store uses in-line keys and the key parameter was provided.",
            )),
            (None, None) if !self.auto_increment => Err(data_error(
                "The object store uses out-of-line keys and has no key generator and the key parameter was not provided.",
            )),
            (None, explicit) => explicit.map(Key::parse).transpose(),
            (Some(key_path), None) => {
                if key::has_path(value, key_path) {
                    key::extract(value, key_path)
                        .map(|_| None)
                        .ok_or_else(|| data_error("Evaluating the object store's key path yielded a value that is not a valid key."))
                } else if !self.auto_increment {
                    Err(data_error("Evaluating the object store's key path did not yield a value."))
                } else {
                    match key_path {
                        KeyPath::Single(path) if key::can_inject(value, path) => Ok(None),
                        _ => Err(data_error("A generated key could not be inserted into the value.")),
                    }
                }
            }
        }
    }

    fn generate_key(&mut self) -> NativeResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(constraint_error("The key generator has reached its maximum value."));
        }
        let key = Key::Number(self.next_key as f64);
        self.next_key += 1;
        Ok(key)
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Key::Number(number) = key {
            if *number >= self.next_key as f64 {
                self.next_key = (number.floor() as u64).saturating_add(1);
            }
        }
    }

    /// Store a record, generating and injecting its key if needed. Expects
    /// [`StoreState::validate_write`] to have passed.
    pub(crate) fn write(&mut self, mut value: Value, key: Option<Key>, overwrite: bool) -> NativeResult<Key> {
        let key = match (key, self.key_path.clone()) {
            (Some(key), _) => key,
            (None, Some(key_path)) => match key::extract(&value, &key_path) {
                Some(key) => key,
                None => {
                    let KeyPath::Single(path) = key_path else {
                        return Err(data_error("Compound key paths cannot use a key generator."));
                    };
                    let generated = self.generate_key()?;
                    if !key::inject(&mut value, &path, generated.to_value()) {
                        return Err(data_error("A generated key could not be inserted into the value."));
                    }
                    generated
                }
            },
            (None, None) => self.generate_key()?,
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(constraint_error("Key already exists in the object store."));
        }
        self.check_unique(&key, &value)?;

        if self.auto_increment {
            self.bump_generator(&key);
        }
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn check_unique(&self, primary_key: &Key, value: &Value) -> NativeResult<()> {
        for (name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            for index_key in index.keys_for(value) {
                let taken = self.records.iter().any(|(other_key, other)| {
                    other_key != primary_key && index.keys_for(other).contains(&index_key)
                });
                if taken {
                    return Err(constraint_error(format!(
                        "Unable to add key to index '{}': at least one key does not satisfy the uniqueness requirements.",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn create_index(&mut self, name: &str, key_path: &KeyPath, options: &IndexOptions) -> NativeResult<()> {
        if self.indexes.contains_key(name) {
            return Err(constraint_error(format!("An index named '{}' already exists.", name)));
        }
        if options.multi_entry && matches!(key_path, KeyPath::Compound(_)) {
            return Err(NativeError::new(
                "InvalidAccessError",
                "A multi-entry index cannot have a compound key path.",
            ));
        }
        let index = IndexState {
            key_path: key_path.clone(),
            unique: options.unique,
            multi_entry: options.multi_entry,
        };
        if index.unique {
            let mut seen = Vec::new();
            for value in self.records.values() {
                for index_key in index.keys_for(value) {
                    if seen.contains(&index_key) {
                        return Err(constraint_error(format!(
                            "Unable to create unique index '{}': existing records share a key.",
                            name
                        )));
                    }
                    seen.push(index_key);
                }
            }
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Records in key order, `(primary key, primary key)` pairs so store and
    /// index traversals share one shape.
    pub(crate) fn entries(&self, bounds: &Bounds) -> Vec<Entry> {
        self.records
            .iter()
            .filter(|(key, _)| bounds.contains(key))
            .map(|(key, value)| Entry {
                key: key.clone(),
                primary_key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Index entries in `(index key, primary key)` order.
    pub(crate) fn index_entries(&self, index: &IndexState, bounds: &Bounds) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .records
            .iter()
            .flat_map(|(primary_key, value)| {
                index
                    .keys_for(value)
                    .into_iter()
                    .filter(|index_key| bounds.contains(index_key))
                    .map(|index_key| Entry {
                        key: index_key,
                        primary_key: primary_key.clone(),
                        value: value.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| (&a.key, &a.primary_key).cmp(&(&b.key, &b.primary_key)));
        entries
    }
}

/// One position of a traversal.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub key: Key,
    pub primary_key: Key,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseState {
    pub version: u32,
    pub stores: BTreeMap<String, StoreState>,
}

/// What an aborted transaction puts back.
#[derive(Debug, Clone)]
pub(crate) enum Rollback {
    /// Version change: schema and records of the whole database.
    Database(DatabaseState),
    /// The stores in scope, as they were before the first write.
    Stores(BTreeMap<String, StoreState>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Active,
    Inactive,
    Aborted,
}

pub(crate) struct TransactionState {
    pub connection: u64,
    pub database: String,
    pub scope: Vec<String>,
    pub mode: TransactionMode,
    pub status: Status,
    /// Requests issued and not yet dispatched.
    pub pending: usize,
    /// Contents to restore on abort, taken before the first write.
    pub snapshot: Option<Rollback>,
    pub on_complete: Vec<Box<dyn FnOnce()>>,
    pub on_error: Vec<Box<dyn FnOnce(NativeError)>>,
    pub on_abort: Vec<Box<dyn FnOnce(Option<NativeError>)>>,
}

pub(crate) struct ConnectionState {
    pub database: String,
    pub version: u32,
    pub closed: bool,
    /// Version-change transaction currently running on this connection.
    pub upgrade: Option<u64>,
    pub error_listener: Option<ErrorListener>,
}

/// An open or delete request parked until other connections close.
pub(crate) struct Waiter {
    pub database: String,
    pub resume: Task,
}

pub(crate) struct Engine {
    pub available: bool,
    pub databases: BTreeMap<String, DatabaseState>,
    pub connections: BTreeMap<u64, ConnectionState>,
    pub transactions: BTreeMap<u64, TransactionState>,
    pub tasks: VecDeque<Task>,
    pub waiters: Vec<Waiter>,
    pub close_calls: HashMap<String, usize>,
    next_id: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            available: true,
            databases: BTreeMap::new(),
            connections: BTreeMap::new(),
            transactions: BTreeMap::new(),
            tasks: VecDeque::new(),
            waiters: Vec::new(),
            close_calls: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Engine {
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Live transaction `id`; finished transactions are gone from the map.
    pub(crate) fn transaction(&self, id: u64) -> NativeResult<&TransactionState> {
        self.transactions.get(&id).ok_or_else(finished)
    }

    pub(crate) fn transaction_mut(&mut self, id: u64) -> NativeResult<&mut TransactionState> {
        self.transactions.get_mut(&id).ok_or_else(finished)
    }

    /// Transaction `id`, which must currently accept requests.
    pub(crate) fn active(&self, id: u64) -> NativeResult<&TransactionState> {
        match self.transactions.get(&id) {
            Some(transaction) if transaction.status == Status::Active => Ok(transaction),
            _ => Err(inactive()),
        }
    }

    /// Like [`Engine::active`], and the transaction may write.
    pub(crate) fn writable(&self, id: u64) -> NativeResult<&TransactionState> {
        let transaction = self.active(id)?;
        if transaction.mode == TransactionMode::ReadOnly {
            return Err(read_only());
        }
        Ok(transaction)
    }

    pub(crate) fn store(&self, database: &str, name: &str) -> NativeResult<&StoreState> {
        self.databases
            .get(database)
            .and_then(|db| db.stores.get(name))
            .ok_or_else(|| not_found(format!("No objectStore named {} in this database", name)))
    }

    pub(crate) fn store_mut(&mut self, database: &str, name: &str) -> NativeResult<&mut StoreState> {
        self.databases
            .get_mut(database)
            .and_then(|db| db.stores.get_mut(name))
            .ok_or_else(|| not_found(format!("No objectStore named {} in this database", name)))
    }

    pub(crate) fn index(&self, database: &str, store: &str, name: &str) -> NativeResult<&IndexState> {
        self.store(database, store)?
            .indexes
            .get(name)
            .ok_or_else(|| not_found(format!("No index named {} on object store {}", name, store)))
    }

    /// Remember the stores in scope before transaction `id` first writes.
    pub(crate) fn snapshot(&mut self, id: u64) {
        let Some(transaction) = self.transactions.get(&id) else {
            return;
        };
        if transaction.snapshot.is_some() {
            return;
        }
        let stores = self
            .databases
            .get(&transaction.database)
            .map(|db| {
                db.stores
                    .iter()
                    .filter(|(name, _)| transaction.scope.contains(*name))
                    .map(|(name, store)| (name.clone(), store.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(transaction) = self.transactions.get_mut(&id) {
            transaction.snapshot = Some(Rollback::Stores(stores));
        }
    }

    /// Put back what transaction `id` changed. Only the stores in its scope
    /// are touched unless it was a version change.
    pub(crate) fn roll_back(&mut self, database: &str, rollback: Rollback) {
        match rollback {
            Rollback::Database(state) => {
                self.databases.insert(database.to_string(), state);
            }
            Rollback::Stores(stores) => {
                if let Some(db) = self.databases.get_mut(database) {
                    db.stores.extend(stores);
                }
            }
        }
    }

    /// Whether transaction `id` has to wait for an older live transaction on
    /// the same database whose scope overlaps, when either of them writes.
    /// Aborted transactions never wait, their requests fail right away.
    pub(crate) fn waiting(&self, id: u64) -> bool {
        let Some(transaction) = self.transactions.get(&id) else {
            return false;
        };
        if transaction.status == Status::Aborted {
            return false;
        }
        self.transactions.range(..id).any(|(_, older)| {
            older.database == transaction.database
                && (older.mode != TransactionMode::ReadOnly || transaction.mode != TransactionMode::ReadOnly)
                && older.scope.iter().any(|store| transaction.scope.contains(store))
        })
    }

    /// End of a dispatch turn: transactions that were active go inactive.
    pub(crate) fn deactivate_all(&mut self) {
        for transaction in self.transactions.values_mut() {
            if transaction.status == Status::Active {
                transaction.status = Status::Inactive;
            }
        }
    }

    /// Oldest transaction that is inactive with nothing pending.
    pub(crate) fn committable(&self) -> Option<u64> {
        self.transactions
            .iter()
            .find(|(_, transaction)| transaction.status == Status::Inactive && transaction.pending == 0)
            .map(|(id, _)| *id)
    }

    pub(crate) fn open_connections(&self, database: &str) -> usize {
        self.connections
            .values()
            .filter(|connection| connection.database == database && !connection.closed)
            .count()
    }
}
