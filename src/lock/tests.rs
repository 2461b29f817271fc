//! Lock Tests
//!
//! Mutual exclusion over the shared store: one winner per key, release by
//! owner only, fail-fast exclusive sections and the polling acquire.

#[cfg(test)]
mod tests {
    use crate::error::StationError;
    use crate::kv::KvStore;
    use crate::kv::memory::MemoryKvStore;
    use crate::lock::DistributedLock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn locks(kv: &Arc<dyn KvStore>, n: usize) -> Vec<Arc<DistributedLock>> {
        (0..n)
            .map(|i| {
                Arc::new(DistributedLock::new(
                    kv.clone(),
                    &format!("node-{}", i),
                    Duration::from_secs(30),
                ))
            })
            .collect()
    }

    // ============================================================
    // ACQUIRE / RELEASE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();

        for lock in locks(&kv, 8) {
            handles.push(tokio::spawn(async move {
                lock.acquire("blob:sha256:abc").await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let nodes = locks(&kv, 2);

        assert!(nodes[0].acquire("k").await.unwrap());
        assert!(!nodes[1].release("k").await.unwrap());
        assert!(!nodes[1].acquire("k").await.unwrap());

        assert!(nodes[0].release("k").await.unwrap());
        assert!(nodes[1].acquire("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_without_lock() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let lock = DistributedLock::new(kv, "node-0", Duration::from_secs(30));
        assert!(!lock.release("never-taken").await.unwrap());
    }

    // ============================================================
    // EXCLUSIVE SECTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_run_exclusive_fails_fast_when_held() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let nodes = locks(&kv, 2);
        nodes[0].acquire("manifest:library/nginx:latest").await.unwrap();

        let calls = AtomicUsize::new(0);
        let result = nodes[1]
            .run_exclusive("manifest:library/nginx:latest", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StationError::LockUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_exclusive_releases_after_success() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let nodes = locks(&kv, 2);

        let value = nodes[0].run_exclusive("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(kv.get("lock:k").await.unwrap().is_none());
        assert!(nodes[1].acquire("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_exclusive_releases_after_failure() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let lock = DistributedLock::new(kv.clone(), "node-0", Duration::from_secs(30));

        let result: Result<(), _> = lock
            .run_exclusive("k", || async {
                Err(StationError::OriginFailure("upstream 503".into()))
            })
            .await;

        assert!(matches!(result, Err(StationError::OriginFailure(_))));
        assert!(kv.get("lock:k").await.unwrap().is_none());
    }

    // ============================================================
    // POLLING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_try_acquire_waits_for_release() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let nodes = locks(&kv, 2);
        nodes[0].acquire("k").await.unwrap();

        let holder = nodes[0].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            holder.release("k").await.unwrap();
        });

        assert!(nodes[1].try_acquire("k", Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_acquire_times_out() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let nodes = locks(&kv, 2);
        nodes[0].acquire("k").await.unwrap();

        let started = std::time::Instant::now();
        assert!(!nodes[1].try_acquire("k", Duration::from_millis(300)).await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_lock_expires_with_ttl() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let crashed = DistributedLock::new(kv.clone(), "node-0", Duration::from_millis(50));
        let other = DistributedLock::new(kv, "node-1", Duration::from_secs(30));

        assert!(crashed.acquire("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(other.acquire("k").await.unwrap());
    }
}
