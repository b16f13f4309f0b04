//! In-process storage engine.
//!
//! [`MemoryEngine`] implements the native traits over plain collections with
//! the event model of a browser engine:
//!
//! - requests never complete synchronously; each one is a task on a FIFO
//!   queue and fires `success` or `error` when dispatched,
//! - a transaction is active while the code that created it (or the
//!   listener of one of its requests) runs, and goes inactive at the end of
//!   that dispatch turn,
//! - an inactive transaction with nothing pending commits,
//! - requests of a transaction wait while an older one with an overlapping
//!   scope is live and either of the two writes,
//! - a failed request fires its own `error`, then the transaction's `error`,
//!   then the transaction aborts and rolls back.
//!
//! Nothing runs on its own: the host drives the loop with
//! [`MemoryEngine::dispatch_next`], [`MemoryEngine::run_until_idle`] or
//! [`MemoryEngine::block_on`], which makes every interleaving deterministic.
//!
//! ```rust,ignore
//! let engine = MemoryEngine::new();
//! let db = engine.block_on(open_database(&engine, "test").on_upgrade(|up| {
//!     up.create_object_store("s", StoreOptions::new())?;
//!     Ok(())
//! }))?;
//! ```

mod cursor;
mod factory;
mod handles;
mod key;
mod request;
mod state;

use std::cell::{RefCell, RefMut};
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};

pub use cursor::MemoryCursor;
pub use handles::{MemoryDatabase, MemoryIndex, MemoryStore, MemoryTransaction};
pub use request::MemoryRequest;

use crate::error::NativeError;
use crate::native::{Backend, NativeResult};
use state::{aborted, finished, Engine, Status};

/// Marker type selecting the memory engine's handles.
pub enum Memory {}

impl Backend for Memory {
    type Value = serde_json::Value;
    type Database = MemoryDatabase;
    type Transaction = MemoryTransaction;
    type Store = MemoryStore;
    type Index = MemoryIndex;
    type Cursor = MemoryCursor;
    type Request<T: 'static> = MemoryRequest<T>;
}

/// Factory and event loop of the memory engine. Clones share the engine.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Rc<RefCell<Engine>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an environment without an engine.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn database_names(&self) -> Vec<String> {
        self.state().databases.keys().cloned().collect()
    }

    /// Transactions created and not yet committed or aborted.
    pub fn live_transactions(&self) -> usize {
        self.state().transactions.len()
    }

    /// Connections to `name` that have not been closed.
    pub fn open_connections(&self, name: &str) -> usize {
        self.state().open_connections(name)
    }

    /// How many connections to `name` have been closed so far.
    pub fn close_calls(&self, name: &str) -> usize {
        self.state().close_calls.get(name).copied().unwrap_or(0)
    }

    /// Run one turn of the event loop: commit a finished transaction, or
    /// dispatch the oldest queued task. Returns `false` when idle.
    pub fn dispatch_next(&self) -> bool {
        let committable = {
            let mut state = self.state();
            state.deactivate_all();
            state.committable()
        };
        if let Some(id) = committable {
            self.commit(id);
            return true;
        }

        let task = self.state().tasks.pop_front();
        match task {
            Some(task) => {
                task(self);
                true
            }
            None => false,
        }
    }

    pub fn run_until_idle(&self) {
        while self.dispatch_next() {}
    }

    /// Drive `future` to completion, dispatching one event between polls.
    ///
    /// # Panics
    ///
    /// Panics when the future is still pending and the engine is idle, since
    /// nothing could ever complete it.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
            if !self.dispatch_next() {
                panic!("memory engine is idle but the future is still pending");
            }
        }
    }

    pub(crate) fn state(&self) -> RefMut<'_, Engine> {
        self.inner.borrow_mut()
    }

    pub(crate) fn enqueue(&self, task: impl FnOnce(&MemoryEngine) + 'static) {
        self.state().tasks.push_back(Box::new(task));
    }

    /// Create a request against transaction `id` and queue `op` to produce
    /// its result.
    pub(crate) fn issue<T: 'static>(
        &self,
        id: u64,
        op: impl FnOnce(&MemoryEngine) -> NativeResult<T> + 'static,
    ) -> NativeResult<MemoryRequest<T>> {
        let request = MemoryRequest::new();
        self.schedule(id, request.clone(), op)?;
        Ok(request)
    }

    /// Queue `op` for an existing request (cursor steps re-arm this way).
    pub(crate) fn schedule<T: 'static>(
        &self,
        id: u64,
        request: MemoryRequest<T>,
        op: impl FnOnce(&MemoryEngine) -> NativeResult<T> + 'static,
    ) -> NativeResult<()> {
        {
            let mut state = self.state();
            state.active(id)?;
            state.transaction_mut(id)?.pending += 1;
        }
        self.enqueue(move |engine| engine.run_request(id, request, op));
        Ok(())
    }

    fn run_request<T: 'static>(
        &self,
        id: u64,
        request: MemoryRequest<T>,
        op: impl FnOnce(&MemoryEngine) -> NativeResult<T> + 'static,
    ) {
        // Not started yet: an older transaction holds an overlapping scope.
        if self.state().waiting(id) {
            tracing::trace!(transaction = id, "memory request waiting for an overlapping transaction");
            self.enqueue(move |engine| engine.run_request(id, request, op));
            return;
        }

        let live = {
            let mut state = self.state();
            match state.transactions.get_mut(&id) {
                Some(transaction) => {
                    transaction.pending = transaction.pending.saturating_sub(1);
                    if transaction.status == Status::Aborted {
                        false
                    } else {
                        transaction.status = Status::Active;
                        true
                    }
                }
                None => false,
            }
        };
        if !live {
            request.fail(aborted());
            return;
        }

        match op(self) {
            Ok(value) => request.succeed(value),
            Err(err) => {
                tracing::trace!(transaction = id, error = %err, "memory request failed");
                request.fail(err.clone());
                self.fail_transaction(id, err);
            }
        }
    }

    /// A request failed: the error reaches the transaction, then the
    /// connection, then the transaction aborts.
    fn fail_transaction(&self, id: u64, err: NativeError) {
        let (on_error, database_listener) = {
            let mut state = self.state();
            let Some(transaction) = state.transactions.get_mut(&id) else {
                return;
            };
            if transaction.status == Status::Aborted {
                return;
            }
            let on_error = std::mem::take(&mut transaction.on_error);
            let connection = transaction.connection;
            let listener = state
                .connections
                .get(&connection)
                .and_then(|connection| connection.error_listener.clone());
            (on_error, listener)
        };

        for listener in on_error {
            listener(err.clone());
        }
        if let Some(listener) = database_listener {
            (*listener.borrow_mut())(err.clone());
        }
        if let Err(abort_err) = self.abort(id, Some(err)) {
            tracing::trace!(transaction = id, error = %abort_err, "transaction already finished");
        }
    }

    /// Roll transaction `id` back and queue its `abort` event behind the
    /// requests it still has queued, which fail with `AbortError`.
    pub(crate) fn abort(&self, id: u64, reason: Option<NativeError>) -> NativeResult<()> {
        {
            let mut state = self.state();
            let transaction = state.transactions.get_mut(&id).ok_or_else(finished)?;
            if transaction.status == Status::Aborted {
                return Err(finished());
            }
            transaction.status = Status::Aborted;
            let database = transaction.database.clone();
            if let Some(rollback) = transaction.snapshot.take() {
                state.roll_back(&database, rollback);
            }
        }
        self.enqueue(move |engine| engine.finish_abort(id, reason));
        Ok(())
    }

    fn finish_abort(&self, id: u64, reason: Option<NativeError>) {
        let removed = self.state().transactions.remove(&id);
        let Some(transaction) = removed else {
            return;
        };
        tracing::debug!(transaction = id, mode = %transaction.mode, "memory transaction aborted");
        self.end_upgrade(transaction.connection, id);
        for listener in transaction.on_abort {
            listener(reason.clone());
        }
    }

    fn commit(&self, id: u64) {
        let removed = self.state().transactions.remove(&id);
        let Some(transaction) = removed else {
            return;
        };
        tracing::debug!(transaction = id, mode = %transaction.mode, "memory transaction committed");
        self.end_upgrade(transaction.connection, id);
        for listener in transaction.on_complete {
            listener();
        }
    }

    fn end_upgrade(&self, connection: u64, id: u64) {
        let mut state = self.state();
        if let Some(connection) = state.connections.get_mut(&connection) {
            if connection.upgrade == Some(id) {
                connection.upgrade = None;
            }
        }
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("MemoryEngine")
            .field("available", &state.available)
            .field("databases", &state.databases.keys().collect::<Vec<_>>())
            .field("transactions", &state.transactions.len())
            .field("queued", &state.tasks.len())
            .finish()
    }
}
