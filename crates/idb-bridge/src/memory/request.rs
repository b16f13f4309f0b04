use std::cell::RefCell;
use std::rc::Rc;

use super::Memory;
use crate::error::NativeError;
use crate::native::{Blocked, Listeners, NativeRequest, UpgradeNeeded};

/// Request handle of the memory engine. Events fired before `listen` are lost,
/// like events fired at a browser request nobody listens to.
pub struct MemoryRequest<T> {
    listeners: Rc<RefCell<Option<Listeners<Memory, T>>>>,
}

impl<T> MemoryRequest<T> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(None)),
        }
    }

    /// Run `fire` with the listeners taken out of the cell, so a listener may
    /// safely touch this request again.
    fn with_listeners(&self, fire: impl FnOnce(&mut Listeners<Memory, T>)) {
        let taken = self.listeners.borrow_mut().take();
        let Some(mut listeners) = taken else {
            tracing::trace!("memory request fired without listeners");
            return;
        };
        fire(&mut listeners);
        let mut slot = self.listeners.borrow_mut();
        if slot.is_none() {
            *slot = Some(listeners);
        }
    }

    pub(crate) fn succeed(&self, value: T) {
        self.with_listeners(|listeners| (listeners.on_success)(value));
    }

    pub(crate) fn fail(&self, error: NativeError) {
        self.with_listeners(|listeners| (listeners.on_error)(error));
    }

    pub(crate) fn blocked(&self, blocked: Blocked) {
        self.with_listeners(|listeners| (listeners.on_blocked)(blocked));
    }

    pub(crate) fn upgrade_needed(&self, event: UpgradeNeeded<Memory>) {
        self.with_listeners(|listeners| {
            if let Some(on_upgrade_needed) = listeners.on_upgrade_needed.as_mut() {
                on_upgrade_needed(event);
            }
        });
    }
}

impl<T> Clone for MemoryRequest<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: 'static> NativeRequest<Memory, T> for MemoryRequest<T> {
    fn listen(&self, listeners: Listeners<Memory, T>) {
        *self.listeners.borrow_mut() = Some(listeners);
    }
}
