//! Per-symbol serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per symbol. Callers try-lock and skip a busy symbol
/// instead of queueing behind it.
#[derive(Clone, Default)]
pub struct SymbolLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, symbol: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(symbol.to_string()).or_default().clone()
    }

    /// Guard for `symbol`, or `None` when another task holds it.
    pub fn try_acquire(&self, symbol: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(symbol).try_lock_owned().ok()
    }

    pub fn is_busy(&self, symbol: &str) -> bool {
        self.slot(symbol).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let locks = SymbolLocks::new();
        let guard = locks.try_acquire("BTCUSD").unwrap();
        assert!(locks.try_acquire("BTCUSD").is_none());
        assert!(locks.is_busy("BTCUSD"));
        assert!(locks.try_acquire("ETHUSD").is_some());

        drop(guard);
        assert!(!locks.is_busy("BTCUSD"));
        assert!(locks.try_acquire("BTCUSD").is_some());
    }
}
