//! Opening, upgrading and deleting databases.

use std::collections::BTreeMap;

use super::handles::{MemoryDatabase, MemoryTransaction};
use super::state::{ConnectionState, DatabaseState, Rollback, Status, TransactionState, Waiter};
use super::{Memory, MemoryEngine, MemoryRequest};
use crate::error::{Error, NativeError, Result};
use crate::native::{Blocked, NativeFactory, NativeResult, UpgradeNeeded};
use crate::types::TransactionMode;

impl NativeFactory for MemoryEngine {
    type Backend = Memory;

    fn ensure_available(&self) -> Result<()> {
        if self.state().available {
            Ok(())
        } else {
            Err(Error::NotAvailable("the in-memory engine is disabled".to_string()))
        }
    }

    fn open(&self, name: &str, version: Option<u32>) -> NativeResult<MemoryRequest<MemoryDatabase>> {
        if version == Some(0) {
            return Err(NativeError::new("TypeError", "The version provided must not be 0."));
        }
        let request = MemoryRequest::new();
        let pending = request.clone();
        let name = name.to_string();
        self.enqueue(move |engine| engine.run_open(pending, name, version));
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> NativeResult<MemoryRequest<()>> {
        let request = MemoryRequest::new();
        let pending = request.clone();
        let name = name.to_string();
        self.enqueue(move |engine| engine.run_delete(pending, name));
        Ok(request)
    }
}

impl MemoryEngine {
    fn run_open(&self, request: MemoryRequest<MemoryDatabase>, name: String, version: Option<u32>) {
        let (current, others) = {
            let state = self.state();
            let current = state.databases.get(&name).map(|db| db.version).unwrap_or(0);
            (current, state.open_connections(&name))
        };
        let requested = version.unwrap_or(current.max(1));

        if requested < current {
            request.fail(NativeError::new(
                "VersionError",
                format!(
                    "The requested version ({}) is less than the existing version ({}).",
                    requested, current
                ),
            ));
            return;
        }

        if requested == current {
            let database = self.connect(&name, current);
            request.succeed(database);
            return;
        }

        if others > 0 {
            request.blocked(Blocked {
                old_version: current,
                new_version: Some(requested),
            });
            let database = name.clone();
            self.park(&database, move |engine| engine.run_open(request, name, version));
            return;
        }

        self.upgrade(request, name, current, requested);
    }

    fn connect(&self, name: &str, version: u32) -> MemoryDatabase {
        let mut state = self.state();
        let id = state.next_id();
        state.connections.insert(
            id,
            ConnectionState {
                database: name.to_string(),
                version,
                closed: false,
                upgrade: None,
                error_listener: None,
            },
        );
        MemoryDatabase::new(self.clone(), id, name.to_string())
    }

    /// Run the version-change transaction, then answer the open request.
    fn upgrade(&self, request: MemoryRequest<MemoryDatabase>, name: String, current: u32, requested: u32) {
        let database = self.connect(&name, requested);
        let connection = database.id();

        let (id, created) = {
            let mut state = self.state();
            let created = !state.databases.contains_key(&name);
            let db = state.databases.entry(name.clone()).or_insert_with(|| DatabaseState {
                version: 0,
                stores: BTreeMap::new(),
            });
            let snapshot = db.clone();
            db.version = requested;
            let scope = db.stores.keys().cloned().collect();

            let id = state.next_id();
            state.transactions.insert(
                id,
                TransactionState {
                    connection,
                    database: name.clone(),
                    scope,
                    mode: TransactionMode::VersionChange,
                    status: Status::Active,
                    pending: 0,
                    snapshot: Some(Rollback::Database(snapshot)),
                    on_complete: Vec::new(),
                    on_error: Vec::new(),
                    on_abort: Vec::new(),
                },
            );
            if let Some(connection) = state.connections.get_mut(&connection) {
                connection.upgrade = Some(id);
            }
            (id, created)
        };
        tracing::debug!(database = %name, old_version = current, new_version = requested, "memory upgrade started");

        let on_complete = {
            let engine = self.clone();
            let request = request.clone();
            let database = database.clone();
            Box::new(move || {
                engine.enqueue(move |_| request.succeed(database));
            })
        };
        let on_abort = {
            let engine = self.clone();
            let request = request.clone();
            let database = database.clone();
            Box::new(move |_reason: Option<NativeError>| {
                engine.close_connection(database.id());
                if created {
                    engine.state().databases.remove(&database.database_name());
                }
                request.fail(NativeError::new(
                    "AbortError",
                    "The version change transaction was aborted.",
                ));
            })
        };
        if let Ok(transaction) = self.state().transaction_mut(id) {
            transaction.on_complete.push(on_complete);
            transaction.on_abort.push(on_abort);
        }

        request.upgrade_needed(UpgradeNeeded {
            database,
            transaction: MemoryTransaction::new(self.clone(), id, name, TransactionMode::VersionChange),
            old_version: current,
            new_version: requested,
        });
    }

    fn run_delete(&self, request: MemoryRequest<()>, name: String) {
        let (version, others) = {
            let state = self.state();
            (
                state.databases.get(&name).map(|db| db.version),
                state.open_connections(&name),
            )
        };
        let Some(version) = version else {
            request.succeed(());
            return;
        };
        if others > 0 {
            request.blocked(Blocked {
                old_version: version,
                new_version: None,
            });
            let database = name.clone();
            self.park(&database, move |engine| engine.run_delete(request, name));
            return;
        }
        self.state().databases.remove(&name);
        tracing::debug!(database = %name, "memory database deleted");
        request.succeed(());
    }

    fn park(&self, database: &str, resume: impl FnOnce(&MemoryEngine) + 'static) {
        self.state().waiters.push(Waiter {
            database: database.to_string(),
            resume: Box::new(resume),
        });
    }

    /// Mark connection `id` closed and resume what was waiting on it.
    pub(crate) fn close_connection(&self, id: u64) {
        let mut state = self.state();
        let Some(connection) = state.connections.get_mut(&id) else {
            return;
        };
        if connection.closed {
            return;
        }
        connection.closed = true;
        let database = connection.database.clone();
        *state.close_calls.entry(database.clone()).or_insert(0) += 1;

        if state.open_connections(&database) == 0 {
            let (ready, waiting): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|waiter| waiter.database == database);
            state.waiters = waiting;
            state.tasks.extend(ready.into_iter().map(|waiter| waiter.resume));
        }
    }
}
