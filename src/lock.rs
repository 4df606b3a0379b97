//! Path-keyed mutexes for per-file critical sections.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Number of lock slots. Paths hash onto slots, so two paths may share one;
/// that only coarsens serialization, never weakens it.
const NUM_LOCKS: usize = 64;

/// Fixed-width table of path-scoped mutexes.
///
/// Callers for the same path always land on the same slot, giving each file
/// a total order over its stage/commit sequences. The slots hold no state
/// besides the lock itself.
pub struct KeyedMutex {
    locks: Vec<Arc<Mutex<()>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: (0..NUM_LOCKS).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    /// Returns the lock guarding `key`.
    pub fn get_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let slot = (hasher.finish() as usize) % NUM_LOCKS;
        self.locks[slot].clone()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}
