//! In-flight request coalescing.
//!
//! Concurrent requests for the same key share one upstream computation: the
//! first caller (the leader) runs the fetcher, later callers subscribe to a
//! broadcast channel and receive the leader's value. If the leader fails,
//! its channel closes and each follower falls back to computing
//! independently — a failed fetch never poisons other requests.

use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;
use tokio::sync::{broadcast, Mutex};

/// Coalesces concurrent computations by key. Values must be `Clone` to fan
/// out to followers.
pub struct Dedupe<T: Clone> {
    pending: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Dedupe<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fetcher` for `key`, joining an in-flight computation when one
    /// exists.
    pub async fn run<F, Fut>(&self, key: &str, fetcher: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let rx = {
            let mut pending = self.pending.lock().await;
            match pending.get(key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    pending.insert(key.to_string(), tx);
                    None
                }
            }
        };

        // Follower: wait for the leader's value; if the leader failed (its
        // sender was dropped without sending), compute independently.
        if let Some(mut rx) = rx {
            if let Ok(value) = rx.recv().await {
                return Ok(value);
            }
            return fetcher().await;
        }

        // Leader: compute, then publish to any followers.
        let result = fetcher().await;

        let mut pending = self.pending.lock().await;
        if let Some(tx) = pending.remove(key) {
            if let Ok(ref value) = result {
                // No receivers is fine; send only fails when nobody joined.
                let _ = tx.send(value.clone());
            }
        }

        result
    }

    /// Number of computations currently in flight.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether a computation for `key` is in flight.
    pub async fn contains(&self, key: &str) -> bool {
        self.pending.lock().await.contains_key(key)
    }

    /// Forget all in-flight entries. Leaders still complete; their followers
    /// fall back to independent computation.
    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }
}

impl<T: Clone + Send + 'static> Default for Dedupe<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_share_one_computation() {
        let dedupe = Arc::new(Dedupe::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dedupe = dedupe.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                dedupe
                    .run("key", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the computation open so the others join it.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("value".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedupe.pending_count().await, 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let dedupe = Arc::new(Dedupe::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let dedupe = dedupe.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedupe
                    .run("a", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("a".to_string())
                    })
                    .await
                    .unwrap()
            })
        };
        let b = {
            let dedupe = dedupe.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                dedupe
                    .run("b", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("b".to_string())
                    })
                    .await
                    .unwrap()
            })
        };

        assert_eq!(a.await.unwrap(), "a");
        assert_eq!(b.await.unwrap(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn follower_computes_when_leader_fails() {
        let dedupe = Arc::new(Dedupe::<String>::new());

        let leader = {
            let dedupe = dedupe.clone();
            tokio::spawn(async move {
                dedupe
                    .run("key", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(anyhow::anyhow!("upstream down"))
                    })
                    .await
            })
        };

        // Let the leader register before the follower joins.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let dedupe = dedupe.clone();
            tokio::spawn(async move {
                dedupe
                    .run("key", || async { Ok("recovered".to_string()) })
                    .await
            })
        };

        assert!(leader.await.unwrap().is_err());
        assert_eq!(follower.await.unwrap().unwrap(), "recovered");
    }

    #[tokio::test]
    async fn pending_introspection() {
        let dedupe = Arc::new(Dedupe::<String>::new());
        assert_eq!(dedupe.pending_count().await, 0);
        assert!(!dedupe.contains("key").await);

        let handle = {
            let dedupe = dedupe.clone();
            tokio::spawn(async move {
                dedupe
                    .run("key", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("done".to_string())
                    })
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(dedupe.contains("key").await);
        assert_eq!(dedupe.pending_count().await, 1);

        handle.await.unwrap();
        assert_eq!(dedupe.pending_count().await, 0);
    }
}
