//! Record accessors: object stores and their indexes.
//!
//! Every operation forwards its arguments unchanged to the native handle and
//! wraps the resulting request in a [`Request`]. Synchronous engine failures
//! (inactive transaction, write on a read-only transaction, invalid key) come
//! back as `Err` from the call itself, so a `?` inside a transaction callback
//! rejects the whole transaction.
//!
//! Accessors are thin views over a (transaction, store) pair and can be
//! created as often as needed.

use crate::cursor::{self, Cursor, CursorErrors};
use crate::error::Result;
use crate::native::{Backend, NativeIndex, NativeSource, NativeStore};
use crate::request::Request;
use crate::types::{CursorDirection, KeyPath, Query};

/// An object store scoped to one transaction.
pub struct ObjectStore<B: Backend> {
    native: B::Store,
}

impl<B: Backend> ObjectStore<B> {
    pub(crate) fn new(native: B::Store) -> Self {
        Self { native }
    }

    pub fn name(&self) -> String {
        self.native.name()
    }

    /// `None` for stores using out-of-line keys.
    pub fn key_path(&self) -> Option<KeyPath> {
        self.native.key_path()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.native.index_names()
    }

    pub fn auto_increment(&self) -> bool {
        self.native.auto_increment()
    }

    /// Insert a record; fails with `ConstraintError` if the key exists.
    /// Resolves with the record's key.
    pub fn add(&self, value: &B::Value, key: Option<&B::Value>) -> Result<Request<B::Value>> {
        let request = self.native.add(value, key)?;
        Ok(Request::bridge::<B, _>(&request))
    }

    /// Insert or replace a record. Resolves with the record's key.
    pub fn put(&self, value: &B::Value, key: Option<&B::Value>) -> Result<Request<B::Value>> {
        let request = self.native.put(value, key)?;
        Ok(Request::bridge::<B, _>(&request))
    }

    pub fn get(&self, query: impl Into<Query<B::Value>>) -> Result<Request<Option<B::Value>>> {
        get::<B, _>(&self.native, query.into())
    }

    pub fn get_key(
        &self,
        query: impl Into<Query<B::Value>>,
    ) -> Result<Request<Option<B::Value>>> {
        get_key::<B, _>(&self.native, query.into())
    }

    pub fn get_all(
        &self,
        query: Option<Query<B::Value>>,
        count: Option<u32>,
    ) -> Result<Request<Vec<B::Value>>> {
        get_all::<B, _>(&self.native, query, count)
    }

    pub fn get_all_keys(
        &self,
        query: Option<Query<B::Value>>,
        count: Option<u32>,
    ) -> Result<Request<Vec<B::Value>>> {
        get_all_keys::<B, _>(&self.native, query, count)
    }

    pub fn delete(&self, query: impl Into<Query<B::Value>>) -> Result<Request<()>> {
        let request = self.native.delete(&query.into())?;
        Ok(Request::bridge::<B, _>(&request))
    }

    pub fn clear(&self) -> Result<Request<()>> {
        let request = self.native.clear()?;
        Ok(Request::bridge::<B, _>(&request))
    }

    pub fn count(&self, query: Option<Query<B::Value>>) -> Result<Request<u32>> {
        count::<B, _>(&self.native, query)
    }

    /// Accessor for a named index of this store, in the same transaction.
    pub fn index(&self, name: &str) -> Result<Index<B>> {
        Ok(Index::new(self.native.index(name)?))
    }

    /// Iterate over records. `on_step` receives each record, then `None`.
    pub fn open_cursor<F>(
        &self,
        query: Option<Query<B::Value>>,
        direction: CursorDirection,
        on_step: F,
    ) -> Result<CursorErrors>
    where
        F: FnMut(Option<Cursor<B>>) + 'static,
    {
        open_cursor::<B, _, _>(&self.native, query, direction, false, on_step)
    }

    /// Iterate over keys only; cursors carry no value.
    pub fn open_key_cursor<F>(
        &self,
        query: Option<Query<B::Value>>,
        direction: CursorDirection,
        on_step: F,
    ) -> Result<CursorErrors>
    where
        F: FnMut(Option<Cursor<B>>) + 'static,
    {
        open_cursor::<B, _, _>(&self.native, query, direction, true, on_step)
    }
}

impl<B: Backend> Clone for ObjectStore<B> {
    fn clone(&self) -> Self {
        Self::new(self.native.clone())
    }
}

/// A named index of an object store, scoped to the same transaction.
///
/// Read only: writes go through the owning [`ObjectStore`].
pub struct Index<B: Backend> {
    native: B::Index,
}

impl<B: Backend> Index<B> {
    pub(crate) fn new(native: B::Index) -> Self {
        Self { native }
    }

    pub fn name(&self) -> String {
        self.native.name()
    }

    pub fn key_path(&self) -> KeyPath {
        self.native.key_path()
    }

    pub fn unique(&self) -> bool {
        self.native.unique()
    }

    pub fn multi_entry(&self) -> bool {
        self.native.multi_entry()
    }

    /// First record whose index key matches `query`.
    pub fn get(&self, query: impl Into<Query<B::Value>>) -> Result<Request<Option<B::Value>>> {
        get::<B, _>(&self.native, query.into())
    }

    /// Primary key of the first record whose index key matches `query`.
    pub fn get_key(
        &self,
        query: impl Into<Query<B::Value>>,
    ) -> Result<Request<Option<B::Value>>> {
        get_key::<B, _>(&self.native, query.into())
    }

    pub fn get_all(
        &self,
        query: Option<Query<B::Value>>,
        count: Option<u32>,
    ) -> Result<Request<Vec<B::Value>>> {
        get_all::<B, _>(&self.native, query, count)
    }

    /// Primary keys, in index order.
    pub fn get_all_keys(
        &self,
        query: Option<Query<B::Value>>,
        count: Option<u32>,
    ) -> Result<Request<Vec<B::Value>>> {
        get_all_keys::<B, _>(&self.native, query, count)
    }

    pub fn count(&self, query: Option<Query<B::Value>>) -> Result<Request<u32>> {
        count::<B, _>(&self.native, query)
    }

    pub fn open_cursor<F>(
        &self,
        query: Option<Query<B::Value>>,
        direction: CursorDirection,
        on_step: F,
    ) -> Result<CursorErrors>
    where
        F: FnMut(Option<Cursor<B>>) + 'static,
    {
        open_cursor::<B, _, _>(&self.native, query, direction, false, on_step)
    }

    pub fn open_key_cursor<F>(
        &self,
        query: Option<Query<B::Value>>,
        direction: CursorDirection,
        on_step: F,
    ) -> Result<CursorErrors>
    where
        F: FnMut(Option<Cursor<B>>) + 'static,
    {
        open_cursor::<B, _, _>(&self.native, query, direction, true, on_step)
    }
}

impl<B: Backend> Clone for Index<B> {
    fn clone(&self) -> Self {
        Self::new(self.native.clone())
    }
}

fn get<B: Backend, S: NativeSource<B>>(
    source: &S,
    query: Query<B::Value>,
) -> Result<Request<Option<B::Value>>> {
    let request = source.get(&query)?;
    Ok(Request::bridge::<B, _>(&request))
}

fn get_key<B: Backend, S: NativeSource<B>>(
    source: &S,
    query: Query<B::Value>,
) -> Result<Request<Option<B::Value>>> {
    let request = source.get_key(&query)?;
    Ok(Request::bridge::<B, _>(&request))
}

fn get_all<B: Backend, S: NativeSource<B>>(
    source: &S,
    query: Option<Query<B::Value>>,
    count: Option<u32>,
) -> Result<Request<Vec<B::Value>>> {
    let request = source.get_all(query.as_ref(), count)?;
    Ok(Request::bridge::<B, _>(&request))
}

fn get_all_keys<B: Backend, S: NativeSource<B>>(
    source: &S,
    query: Option<Query<B::Value>>,
    count: Option<u32>,
) -> Result<Request<Vec<B::Value>>> {
    let request = source.get_all_keys(query.as_ref(), count)?;
    Ok(Request::bridge::<B, _>(&request))
}

fn count<B: Backend, S: NativeSource<B>>(
    source: &S,
    query: Option<Query<B::Value>>,
) -> Result<Request<u32>> {
    let request = source.count(query.as_ref())?;
    Ok(Request::bridge::<B, _>(&request))
}

fn open_cursor<B, S, F>(
    source: &S,
    query: Option<Query<B::Value>>,
    direction: CursorDirection,
    keys_only: bool,
    on_step: F,
) -> Result<CursorErrors>
where
    B: Backend,
    S: NativeSource<B>,
    F: FnMut(Option<Cursor<B>>) + 'static,
{
    let request = if keys_only {
        source.open_key_cursor(query.as_ref(), direction)?
    } else {
        source.open_cursor(query.as_ref(), direction)?
    };
    Ok(cursor::iterate::<B, _, _>(&request, on_step))
}
