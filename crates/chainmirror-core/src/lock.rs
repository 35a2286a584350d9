//! Per-entity async locks.
//!
//! Every read-modify-write of a token or an order happens while holding the
//! entity's lock. Locks are keyed, created on first use and pruned once no
//! task holds or waits for them. Acquisition waits; it never fails fast.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::order::OrderId;
use crate::types::TokenKey;

/// Number of tracked keys above which idle slots are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed exclusive locks.
pub struct LockManager<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for LockManager<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Held lock on one entity; released on drop.
pub struct EntityGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> EntityGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone + Debug> LockManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> EntityGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() >= PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(key.clone()).or_default().clone()
        };
        tracing::trace!(key = ?key, "acquiring entity lock");
        let guard = slot.lock_owned().await;
        EntityGuard {
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The lock sets shared by every stream of one mirror.
#[derive(Default)]
pub struct EntityLocks {
    pub tokens: LockManager<TokenKey>,
    pub orders: LockManager<OrderId>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }
}
