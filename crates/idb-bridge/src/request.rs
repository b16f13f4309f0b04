//! One native request, one future.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;

use crate::error::{Error, Result};
use crate::native::{Backend, Listeners, NativeRequest, UpgradeNeeded};

type Sender<T> = Rc<RefCell<Option<oneshot::Sender<Result<T>>>>>;

/// Future resolving with the result of a single native request.
///
/// The native listeners are attached when the `Request` is created, not when
/// it is first polled, so an event can never fire before anyone listens.
/// Dropping the future does not cancel the native request.
#[must_use = "dropping a Request does not cancel the native operation, but its result is lost"]
pub struct Request<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T: 'static> Request<T> {
    pub(crate) fn bridge<B: Backend, R: NativeRequest<B, T>>(native: &R) -> Self {
        Self::listen::<B, R>(native, None)
    }

    /// Same as [`Request::bridge`], with an `upgradeneeded` handler attached in
    /// the same call as the other listeners.
    pub(crate) fn bridge_with_upgrade<B: Backend, R: NativeRequest<B, T>>(
        native: &R,
        on_upgrade_needed: Box<dyn FnMut(UpgradeNeeded<B>)>,
    ) -> Self {
        Self::listen::<B, R>(native, Some(on_upgrade_needed))
    }

    fn listen<B: Backend, R: NativeRequest<B, T>>(
        native: &R,
        on_upgrade_needed: Option<Box<dyn FnMut(UpgradeNeeded<B>)>>,
    ) -> Self {
        let (sender, receiver) = oneshot::channel();
        let sender: Sender<T> = Rc::new(RefCell::new(Some(sender)));
        let success_sender = sender.clone();
        let error_sender = sender;

        native.listen(Listeners {
            on_success: Box::new(move |value| resolve(&success_sender, Ok(value))),
            on_error: Box::new(move |err| resolve(&error_sender, Err(err.into()))),
            on_blocked: Box::new(|blocked| {
                tracing::warn!(
                    old_version = blocked.old_version,
                    new_version = ?blocked.new_version,
                    "IndexedDB request is blocked by another open connection"
                );
            }),
            on_upgrade_needed,
        });

        Self { receiver }
    }
}

fn resolve<T>(sender: &Sender<T>, outcome: Result<T>) {
    if let Some(sender) = sender.borrow_mut().take() {
        // The caller may have dropped the future; the outcome is simply lost.
        let _ = sender.send(outcome);
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}
