//! Scoped listener registration (§4.A).
//!
//! A [`Subscription`] wraps a spawned forwarding task in a
//! `tokio::task::JoinHandle` it can `abort()` on teardown — a disciplined,
//! reusable bulk-unsubscribe primitive shared by [`crate::manager::Manager`]
//! and [`crate::socket::Socket`] instead of a one-off per call site.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// An opaque handle to a listener registration. `release()` is idempotent
/// and has no effect after the first call.
pub struct Subscription {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub(crate) fn from_handle(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Detach the listener. Safe to call more than once or concurrently;
    /// only the first call has an effect.
    pub fn release(&self) {
        if let Some(handle) = sio_core::lock(&self.handle).take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Subscribe `handler` to every value broadcast on `rx`, returning a
/// [`Subscription`] that detaches it. Lagged messages are skipped rather
/// than treated as fatal, matching broadcast-channel semantics used
/// throughout this crate.
pub fn subscribe<T, F>(mut rx: broadcast::Receiver<T>, mut handler: F) -> Subscription
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => handler(value),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Subscription::from_handle(handle)
}
