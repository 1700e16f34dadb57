use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process per-key mutexes (one per phone number).
///
/// Idle entries are evicted so the map does not grow with every number ever
/// seen. Holds are short (one inbound event) and far below the idle timeout.
/// Cross-instance safety comes from the conditional conversation update, not
/// from this lock.
#[derive(Clone)]
pub struct KeyedLocks {
    locks: Cache<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new(idle: Duration) -> Self {
        Self {
            locks: Cache::builder().time_to_idle(idle).build(),
        }
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .get_with(key.to_string(), async { Arc::new(Mutex::new(())) })
            .await;
        mutex.lock_owned().await
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::default();
        let in_section = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("+31612345678").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _a = locks.lock("+31600000001").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("+31600000002")).await;
        assert!(b.is_ok());
    }
}
