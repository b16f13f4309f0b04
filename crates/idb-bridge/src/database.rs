//! Root API: open, use-and-dispose, delete.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::native::{Backend, NativeFactory, UpgradeNeeded};
use crate::request::Request;
use crate::upgrade::Upgrade;

type UpgradeCallback<B> = Box<dyn FnOnce(&Upgrade<B>) -> Result<()>>;

/// Builder returned by [`open_database`]; await it to open the connection.
pub struct OpenDatabase<'a, F: NativeFactory> {
    factory: &'a F,
    name: String,
    version: Option<u32>,
    on_upgrade: Option<UpgradeCallback<F::Backend>>,
}

/// Open (or create) the database `name`.
///
/// ```rust,ignore
/// let db = open_database(&factory, "test")
///     .version(1)
///     .on_upgrade(|upgrade| {
///         upgrade.create_object_store("my-store", StoreOptions::new())?;
///         Ok(())
///     })
///     .await?;
/// ```
pub fn open_database<'a, F: NativeFactory>(factory: &'a F, name: &str) -> OpenDatabase<'a, F> {
    OpenDatabase {
        factory,
        name: name.to_string(),
        version: None,
        on_upgrade: None,
    }
}

impl<'a, F: NativeFactory> OpenDatabase<'a, F> {
    /// Requested version. Without it the engine opens the current version,
    /// or version 1 for a new database.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Schema callback, run synchronously inside the `upgradeneeded` event.
    /// Returning `Err` aborts the upgrade and fails the open with that error.
    pub fn on_upgrade<C>(mut self, callback: C) -> Self
    where
        C: FnOnce(&Upgrade<F::Backend>) -> Result<()> + 'static,
    {
        self.on_upgrade = Some(Box::new(callback));
        self
    }

    async fn open(self) -> Result<Connection<F::Backend>> {
        let OpenDatabase {
            factory,
            name,
            version,
            on_upgrade,
        } = self;

        factory.ensure_available()?;

        let open_error = |source: Error| Error::Open {
            name: name.clone(),
            version,
            source: Box::new(source),
        };

        let upgrade_failure: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));
        let on_upgrade_needed = upgrade_handler(name.clone(), on_upgrade, upgrade_failure.clone());

        let request = factory
            .open(&name, version)
            .map_err(|err| open_error(err.into()))?;
        let database = Request::bridge_with_upgrade::<F::Backend, _>(&request, on_upgrade_needed)
            .await
            .map_err(|err| open_error(upgrade_failure.borrow_mut().take().unwrap_or(err)))?;

        tracing::debug!(database = %name, "opened database");
        Ok(Connection::new(database))
    }
}

impl<'a, F: NativeFactory> IntoFuture for OpenDatabase<'a, F> {
    type Output = Result<Connection<F::Backend>>;
    type IntoFuture = LocalBoxFuture<'a, Result<Connection<F::Backend>>>;

    fn into_future(self) -> Self::IntoFuture {
        self.open().boxed_local()
    }
}

fn upgrade_handler<B: Backend>(
    name: String,
    callback: Option<UpgradeCallback<B>>,
    failure: Rc<RefCell<Option<Error>>>,
) -> Box<dyn FnMut(UpgradeNeeded<B>)> {
    let mut callback = callback;
    Box::new(move |event: UpgradeNeeded<B>| {
        let old_version = event.old_version;
        let new_version = event.new_version;
        let Some(callback) = callback.take() else {
            tracing::warn!(
                database = %name,
                old_version,
                new_version,
                "unhandled IndexedDB upgradeneeded event"
            );
            return;
        };

        let upgrade = Upgrade::new(event);
        if let Err(err) = callback(&upgrade) {
            tracing::error!(database = %name, error = %err, "upgrade callback failed, aborting");
            *failure.borrow_mut() = Some(err);
            upgrade.abort();
        }
    })
}

/// Open the connection, hand it to `callback` and close it on every exit
/// path: success, error, or the returned future being dropped.
pub async fn using_database<B, O, F, Fut, R>(connection: O, callback: F) -> Result<R>
where
    B: Backend,
    O: IntoFuture<Output = Result<Connection<B>>>,
    F: FnOnce(Connection<B>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let connection = connection.await?;
    let _disposer = Disposer(connection.clone());
    callback(connection).await
}

struct Disposer<B: Backend>(Connection<B>);

impl<B: Backend> Drop for Disposer<B> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Delete the database `name`. Succeeds when it does not exist.
pub async fn delete_database<F: NativeFactory>(factory: &F, name: &str) -> Result<()> {
    factory.ensure_available()?;

    let delete_error = |source: Error| Error::Delete {
        name: name.to_string(),
        source: Box::new(source),
    };

    let request = factory
        .delete_database(name)
        .map_err(|err| delete_error(err.into()))?;
    Request::<()>::bridge::<F::Backend, _>(&request)
        .await
        .map_err(delete_error)?;

    tracing::debug!(database = name, "deleted database");
    Ok(())
}
