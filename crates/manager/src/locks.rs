//! Per-token finalize locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Keyed async locks serializing finalize per upload token.
///
/// Entries are created on first use and removed when the last holder or
/// waiter goes away, so the table only grows with in-flight finalizes.
#[derive(Clone, Default)]
pub struct FinalizeLocks {
    table: LockTable,
}

impl FinalizeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive finalize rights on `token`.
    pub async fn acquire(&self, token: &str) -> FinalizeGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(token.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;

        FinalizeGuard {
            token: token.to_string(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Check whether a finalize currently holds `token`.
    pub fn is_held(&self, token: &str) -> bool {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .get(token)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of tokens with a holder or waiter.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive finalize rights on one token, released on drop.
pub struct FinalizeGuard {
    token: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        // Release under the table lock so a new acquirer never sees a stale entry.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if table
            .get(&self.token)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.token);
        }
    }
}
