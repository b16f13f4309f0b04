//! Callback-driven cursor traversal.
//!
//! The engine's cursor protocol is pull based: each `success` delivers one
//! record (or null at the end) and nothing more happens until the receiver
//! calls `continue`/`advance` on the cursor. [`iterate`] keeps that shape: the
//! step callback is invoked once per record and once more with `None`, and it
//! decides by itself whether to ask for the next step. There is never more
//! than one cursor request in flight, and nothing is buffered.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::Stream;

use crate::error::{Error, Result};
use crate::native::{Backend, Listeners, NativeCursor, NativeRequest};
use crate::request::Request;
use crate::types::CursorDirection;

/// A cursor positioned on one record.
///
/// `update`, `delete`, `continue_` and `advance` must be called from inside
/// the step callback (or from a continuation of a request issued in the same
/// transaction), while the transaction is still active.
pub struct Cursor<B: Backend> {
    native: B::Cursor,
    direction: CursorDirection,
    key: B::Value,
    primary_key: B::Value,
    value: Option<B::Value>,
}

impl<B: Backend> Cursor<B> {
    pub(crate) fn new(native: B::Cursor) -> Self {
        Self {
            direction: native.direction(),
            key: native.key(),
            primary_key: native.primary_key(),
            value: native.value(),
            native,
        }
    }

    pub fn direction(&self) -> CursorDirection {
        self.direction
    }

    /// Position key: the primary key for store cursors, the index key for
    /// index cursors.
    pub fn key(&self) -> &B::Value {
        &self.key
    }

    pub fn primary_key(&self) -> &B::Value {
        &self.primary_key
    }

    /// Current record; always `None` for key cursors.
    pub fn value(&self) -> Option<&B::Value> {
        self.value.as_ref()
    }

    /// Request the next step.
    pub fn continue_(&self) -> Result<()> {
        Ok(self.native.continue_(None)?)
    }

    /// Request the step positioned at (or after, in iteration order) `key`.
    pub fn continue_to(&self, key: &B::Value) -> Result<()> {
        Ok(self.native.continue_(Some(key))?)
    }

    /// Skip `count - 1` records and request the one after.
    pub fn advance(&self, count: u32) -> Result<()> {
        Ok(self.native.advance(count)?)
    }

    /// Replace the current record. Resolves with its primary key.
    pub fn update(&self, value: &B::Value) -> Result<Request<B::Value>> {
        let request = self.native.update(value)?;
        Ok(Request::bridge::<B, _>(&request))
    }

    /// Delete the current record.
    pub fn delete(&self) -> Result<Request<()>> {
        let request = self.native.delete()?;
        Ok(Request::bridge::<B, _>(&request))
    }
}

impl<B: Backend> Clone for Cursor<B> {
    fn clone(&self) -> Self {
        Self {
            native: self.native.clone(),
            direction: self.direction,
            key: self.key.clone(),
            primary_key: self.primary_key.clone(),
            value: self.value.clone(),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Cursor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("direction", &self.direction)
            .field("key", &self.key)
            .field("primary_key", &self.primary_key)
            .field("value", &self.value)
            .finish()
    }
}

/// Failures of a cursor request.
///
/// Kept apart from the step callback: `None` in the callback means the range
/// is exhausted, an item here means the request itself failed. The failure
/// also reaches the owning transaction, which rejects.
#[derive(Debug)]
pub struct CursorErrors {
    receiver: mpsc::UnboundedReceiver<Error>,
}

impl CursorErrors {
    /// Next failure that has already been reported, if any.
    pub fn try_next(&mut self) -> Option<Error> {
        self.receiver.try_next().ok().flatten()
    }
}

impl Stream for CursorErrors {
    type Item = Error;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

/// Attach `on_step` to an open-cursor request.
pub(crate) fn iterate<B, R, F>(request: &R, mut on_step: F) -> CursorErrors
where
    B: Backend,
    R: NativeRequest<B, Option<B::Cursor>>,
    F: FnMut(Option<Cursor<B>>) + 'static,
{
    let (sender, receiver) = mpsc::unbounded();

    request.listen(Listeners {
        on_success: Box::new(move |cursor: Option<B::Cursor>| {
            on_step(cursor.map(Cursor::new));
        }),
        on_error: Box::new(move |err| {
            tracing::error!(error = %err, "cursor request failed");
            let _ = sender.unbounded_send(Error::from(err));
        }),
        on_blocked: Box::new(|_| {}),
        on_upgrade_needed: None,
    });

    CursorErrors { receiver }
}
