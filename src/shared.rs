//! Sharing one controller between threads.
//!
//! The serial link has no multiplexing, so every operation runs under a
//! single lock. Waits can still be aborted from outside through the
//! controller's [`CancelToken`], which is readable without the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::channel::{SerialChannel, SerialPortChannel};
use crate::protocol::MountController;

/// Flag that aborts the next (or current) wait on an axis
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Consume a pending cancellation.
    pub fn take(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }
}

/// Cloneable, thread-safe handle on one controller
pub struct MountHandle<C: SerialChannel = SerialPortChannel> {
    inner: Arc<Mutex<MountController<C>>>,
    cancel: CancelToken,
}

impl<C: SerialChannel> Clone for MountHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: SerialChannel> MountHandle<C> {
    pub fn new(controller: MountController<C>) -> Self {
        let cancel = controller.cancel_token();
        Self {
            inner: Arc::new(Mutex::new(controller)),
            cancel,
        }
    }

    /// Lock the controller, recovering from a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, MountController<C>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MountController<C>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Abort a wait in progress on any thread without taking the lock.
    ///
    /// Has no effect on a wait started after the call.
    pub fn cancel_wait(&self) {
        self.cancel.cancel();
    }
}
