//! Poison-proof locking for the `std::sync::Mutex`s guarding `Manager` and
//! `Socket` state.
//!
//! Those types deliberately use `std::sync::Mutex` rather than
//! `tokio::sync::Mutex`: Manager/Socket operations are synchronous,
//! non-blocking steps (§5) that register a callback or timer and return
//! immediately — `emit`, `on`, `connect`, and the config accessors are
//! called directly by users and by plain `FnMut` event handlers that cannot
//! `.await` anything. Switching the guarded state to a `tokio::sync`
//! primitive would force every one of those call sites into `async fn`,
//! which breaks that contract. A held `std::sync::Mutex` is never crossed
//! with an `.await` point in this crate, so there is no risk of blocking an
//! executor thread.
//!
//! A poisoned `std::sync::Mutex` only happens if some other thread already
//! panicked while holding the lock; re-panicking on every subsequent lock
//! attempt just cascades one bug into every other caller. [`lock`] recovers
//! the guard instead.

use std::sync::{Mutex, MutexGuard};

/// Lock `mutex`, recovering the inner guard even if a prior panic poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_recovers_after_poison() {
        let mutex = Mutex::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = mutex.lock().unwrap();
            panic!("simulate a poisoning panic while holding the lock");
        }));
        assert!(result.is_err());
        assert!(mutex.is_poisoned());

        // A plain `.lock().unwrap()` would panic here; `lock()` recovers.
        let mut guard = lock(&mutex);
        *guard += 1;
        assert_eq!(*guard, 1);
    }
}
