//! Transaction coordination.
//!
//! [`open`] creates the native transaction, attaches its terminal listeners,
//! then runs the setup callback synchronously, before returning. Everything
//! the callback needs from the transaction must be issued from inside it (or
//! from continuations of requests it issued): the engine closes a transaction
//! as soon as control reaches the event loop with nothing pending, and this
//! layer neither defers nor batches operations to hide that.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::error::{Error, NativeError, Result};
use crate::native::{Backend, NativeDatabase, NativeTransaction, TransactionListeners};
use crate::store::ObjectStore;
use crate::types::TransactionMode;

/// Resolves with the setup callback's return value once the transaction
/// completes, or rejects with the transaction's error or abort.
pub type TransactionFuture<R> = LocalBoxFuture<'static, Result<R>>;

/// Stores a transaction spans: a single name, or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNames {
    One(String),
    Many(Vec<String>),
}

impl StoreNames {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StoreNames::One(name) => vec![name.clone()],
            StoreNames::Many(names) => names.clone(),
        }
    }
}

impl From<&str> for StoreNames {
    fn from(name: &str) -> Self {
        StoreNames::One(name.to_string())
    }
}

impl From<String> for StoreNames {
    fn from(name: String) -> Self {
        StoreNames::One(name)
    }
}

impl From<&String> for StoreNames {
    fn from(name: &String) -> Self {
        StoreNames::One(name.clone())
    }
}

impl From<Vec<String>> for StoreNames {
    fn from(names: Vec<String>) -> Self {
        StoreNames::Many(names)
    }
}

impl From<Vec<&str>> for StoreNames {
    fn from(names: Vec<&str>) -> Self {
        StoreNames::Many(names.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for StoreNames {
    fn from(names: &[&str]) -> Self {
        StoreNames::Many(names.iter().map(|name| name.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for StoreNames {
    fn from(names: [&str; N]) -> Self {
        StoreNames::Many(names.iter().map(|name| name.to_string()).collect())
    }
}

/// Anything a caller may pass as a transaction mode. Validation happens when
/// the transaction is opened, so invalid names reject the transaction future.
pub trait IntoTransactionMode {
    fn into_mode(self) -> Result<TransactionMode>;
}

impl IntoTransactionMode for TransactionMode {
    fn into_mode(self) -> Result<TransactionMode> {
        Ok(self)
    }
}

/// `None` means `readonly`.
impl IntoTransactionMode for Option<TransactionMode> {
    fn into_mode(self) -> Result<TransactionMode> {
        Ok(self.unwrap_or_default())
    }
}

impl IntoTransactionMode for &str {
    fn into_mode(self) -> Result<TransactionMode> {
        self.parse()
    }
}

impl IntoTransactionMode for String {
    fn into_mode(self) -> Result<TransactionMode> {
        self.parse()
    }
}

/// Handle passed to a transaction's setup callback.
pub struct Transaction<B: Backend> {
    native: B::Transaction,
    mode: TransactionMode,
}

impl<B: Backend> Transaction<B> {
    pub(crate) fn new(native: B::Transaction, mode: TransactionMode) -> Self {
        Self { native, mode }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.native.object_store_names()
    }

    /// Roll back everything issued so far. The transaction future rejects
    /// with [`Error::Aborted`], pending requests fail.
    pub fn abort(&self) -> Result<()> {
        Ok(self.native.abort()?)
    }

    /// Accessor for one of the stores in scope. May be called any number of
    /// times; every accessor shares this transaction.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore<B>> {
        Ok(ObjectStore::new(self.native.object_store(name)?))
    }
}

/// Open a transaction over `stores` and run `setup` inside it.
pub(crate) fn open<B, M, F, R>(
    database: &B::Database,
    stores: StoreNames,
    mode: M,
    setup: F,
) -> TransactionFuture<R>
where
    B: Backend,
    M: IntoTransactionMode,
    F: FnOnce(&Transaction<B>) -> Result<R>,
    R: 'static,
{
    let mode = match mode.into_mode() {
        Ok(mode @ (TransactionMode::ReadOnly | TransactionMode::ReadWrite)) => mode,
        Ok(other) => return future::err(Error::InvalidMode(other.to_string())).boxed_local(),
        Err(err) => return future::err(err).boxed_local(),
    };

    let native = match database.transaction(&stores.to_vec(), mode) {
        Ok(native) => native,
        Err(err) => return future::err(err.into()).boxed_local(),
    };

    let finished = listen::<B>(&native);
    let transaction = Transaction::<B>::new(native.clone(), mode);

    match setup(&transaction) {
        Ok(value) => async move {
            finished.await.unwrap_or(Err(Error::Canceled))?;
            Ok(value)
        }
        .boxed_local(),
        Err(err) => {
            // Nothing issued by a failed callback may commit.
            if let Err(abort_err) = native.abort() {
                tracing::debug!(error = %abort_err, "transaction already finished after failed setup");
            }
            future::err(err).boxed_local()
        }
    }
}

/// Resolve a channel with the transaction's first terminal event.
pub(crate) fn listen<B: Backend>(
    native: &B::Transaction,
) -> oneshot::Receiver<Result<()>> {
    let (sender, receiver) = oneshot::channel();
    let sender = Rc::new(RefCell::new(Some(sender)));
    let on_error_sender = sender.clone();
    let on_abort_sender = sender.clone();

    native.listen(TransactionListeners {
        on_complete: Box::new(move || finish(&sender, Ok(()))),
        on_error: Box::new(move |err: NativeError| finish(&on_error_sender, Err(err.into()))),
        on_abort: Box::new(move |reason| {
            tracing::debug!(reason = ?reason, "transaction aborted");
            finish(&on_abort_sender, Err(Error::Aborted(reason)))
        }),
    });

    receiver
}

fn finish(sender: &Rc<RefCell<Option<oneshot::Sender<Result<()>>>>>, outcome: Result<()>) {
    if let Some(sender) = sender.borrow_mut().take() {
        let _ = sender.send(outcome);
    }
}
