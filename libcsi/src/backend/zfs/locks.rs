//! Per-volume mutual exclusion.
//!
//! Lifecycle operations on the same volume identifier are serialized; work on
//! different identifiers runs concurrently.  An identifier's entry exists only
//! while somebody holds or waits for its lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Default, Clone)]
pub struct VolumeLocks {
    map: Arc<LockMap>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> VolumeGuard {
        // Clone out of the shard before awaiting so the map is not held
        // across the wait.
        let mutex = self.map.entry(id.to_owned()).or_default().clone();
        let mut waiting = Waiting {
            id,
            map: &self.map,
            acquired: false,
        };
        let guard = mutex.lock_owned().await;
        waiting.acquired = true;
        VolumeGuard {
            id: id.to_owned(),
            map: Arc::clone(&self.map),
            guard: Some(guard),
        }
    }

    /// Number of identifiers with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Cleans up after a waiter whose `lock` future is dropped before it gets
/// the lock.
struct Waiting<'a> {
    id: &'a str,
    map: &'a LockMap,
    acquired: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if !self.acquired {
            // The pending acquire is dropped first, so only the map is left
            // unless somebody else holds or waits.
            self.map
                .remove_if(self.id, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Exclusive access to one volume identifier, released on drop.
pub struct VolumeGuard {
    id: String,
    map: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        // The map and this guard hold the only references: nobody waits.
        self.map
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 2);
        self.guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = VolumeLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock("pvc-1").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = VolumeLocks::new();
        let _a = locks.lock("pvc-a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("pvc-b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_removed_after_release() {
        let locks = VolumeLocks::new();
        {
            let _guard = locks.lock("pvc-1").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_entry() {
        let locks = VolumeLocks::new();
        let first = locks.lock("pvc-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("pvc-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Release first: the entry survives for the waiter, which then gives up.
        drop(first);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert!(locks.is_empty());

        // A timed-out wait behaves the same.
        let held = locks.lock("pvc-2").await;
        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), locks.lock("pvc-2")).await;
        assert!(timed_out.is_err());
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn waiter_keeps_entry_alive() {
        let locks = VolumeLocks::new();
        let first = locks.lock("pvc-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("pvc-1").await;
            })
        };
        // Let the waiter register before releasing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
