//! Striped per-app locks.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Fixed-size array of mutexes indexed by `hash(app) % n`, giving
/// bounded-memory per-app mutual exclusion. Two apps hashing to the same
/// stripe serialize against each other; that costs tail latency, never
/// correctness.
///
/// Each stripe guards the cooldown entries (`app → earliest next action`)
/// of the apps mapped to it, so holding an app's stripe is both the
/// action lock and the cooldown-map lock.
pub struct AppLocks {
    stripes: Vec<Mutex<HashMap<String, Instant>>>,
}

impl AppLocks {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            stripes: (0..size).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn stripe_index(&self, app_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        app_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Acquire the stripe for an app. The guard exposes the cooldown
    /// entries of every app on this stripe; callers only touch their own.
    pub async fn lock(&self, app_id: &str) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.stripes[self.stripe_index(app_id)].lock().await
    }
}
