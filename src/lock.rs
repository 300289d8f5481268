use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use nix::errno::Errno;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::ops::AsyncOp;
use crate::store::ObjectStore;
use crate::types::{
    is_errno, STRIPE_LOCK_COOKIE_EXCLUSIVE, STRIPE_LOCK_COOKIE_SHARED, STRIPE_LOCK_NAME,
    STRIPE_LOCK_TAG,
};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

struct LockState {
    /// Current holder identity. Shared holders collapse to the first
    /// claimer; they cooperate as one writer group for renewal.
    holder: Option<Uuid>,
    /// `None` means the lease is expired (or never taken).
    lease_start: Option<Instant>,
}

impl LockState {
    fn within_lease(&self, lease: Duration) -> bool {
        match self.lease_start {
            Some(start) => start.elapsed() + Duration::from_secs(1) < lease,
            None => false,
        }
    }
}

/// Lease-based advisory lock on an inode's base object. Two store-side
/// cookies back the two modes; the local state rides an unexpired lease
/// so repeat acquisitions by the same op are free.
pub struct StripeLocker {
    store: Arc<dyn ObjectStore>,
    object: String,
    lease: Duration,
    state: Mutex<LockState>,
}

impl StripeLocker {
    pub fn new(store: Arc<dyn ObjectStore>, object: String, lease: Duration) -> Self {
        Self {
            store,
            object,
            lease,
            state: Mutex::new(LockState {
                holder: None,
                lease_start: None,
            }),
        }
    }

    pub async fn acquire_shared(&self, uuid: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.within_lease(self.lease) {
                if state.holder.is_none() {
                    state.holder = Some(uuid);
                }
                if state.holder == Some(uuid) {
                    debug!(object = %self.object, holder = %uuid, "kept shared stripe lock");
                    return Ok(());
                }
            }
        }

        loop {
            let attempt = self
                .store
                .lock_shared(
                    &self.object,
                    STRIPE_LOCK_NAME,
                    STRIPE_LOCK_COOKIE_SHARED,
                    STRIPE_LOCK_TAG,
                    self.lease,
                )
                .await;
            match attempt {
                Ok(()) => break,
                Err(err) if is_errno(&err, Errno::EBUSY) => {
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(err) => return Err(err),
            }
        }

        let mut state = self.state.lock().await;
        state.holder = Some(uuid);
        state.lease_start = Some(Instant::now());
        debug!(object = %self.object, holder = %uuid, "set shared stripe lock");
        Ok(())
    }

    pub async fn acquire_exclusive(&self, uuid: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.within_lease(self.lease) {
                if state.holder.is_none() {
                    state.holder = Some(uuid);
                }
                if state.holder == Some(uuid) {
                    debug!(object = %self.object, holder = %uuid, "kept exclusive stripe lock");
                    return Ok(());
                }
            }
        }

        loop {
            let attempt = self
                .store
                .lock_exclusive(
                    &self.object,
                    STRIPE_LOCK_NAME,
                    STRIPE_LOCK_COOKIE_EXCLUSIVE,
                    self.lease,
                )
                .await;
            match attempt {
                Ok(()) => break,
                Err(err) if is_errno(&err, Errno::EBUSY) => {
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(err) => return Err(err),
            }
        }

        let mut state = self.state.lock().await;
        state.holder = Some(uuid);
        state.lease_start = Some(Instant::now());
        debug!(object = %self.object, holder = %uuid, "set exclusive stripe lock");
        Ok(())
    }

    pub async fn release_shared(&self) {
        let mut state = self.state.lock().await;
        let _ = self
            .store
            .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_SHARED)
            .await;
        state.holder = None;
        debug!(object = %self.object, "released shared stripe lock");
    }

    pub async fn release_exclusive(&self) {
        let mut state = self.state.lock().await;
        let _ = self
            .store
            .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_EXCLUSIVE)
            .await;
        state.holder = None;
        debug!(object = %self.object, "released exclusive stripe lock");
    }

    /// Teardown path: drop both cookies.
    pub async fn release_all(&self) {
        let mut state = self.state.lock().await;
        let _ = self
            .store
            .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_SHARED)
            .await;
        let _ = self
            .store
            .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_EXCLUSIVE)
            .await;
        state.holder = None;
        state.lease_start = None;
    }

    /// Cooperatively release a holder-less lease that has sat idle for
    /// at least `idle_timeout` but has not yet expired. Marks the lease
    /// expired afterwards so repeated calls no-op.
    pub async fn manage_idle(&self, idle_timeout: Duration) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if state.holder.is_some() {
            return;
        }
        let Some(start) = state.lease_start else {
            return;
        };
        let elapsed = start.elapsed();
        if elapsed >= idle_timeout && elapsed <= self.lease {
            let _ = self
                .store
                .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_SHARED)
                .await;
            let _ = self
                .store
                .unlock(&self.object, STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_EXCLUSIVE)
                .await;
            state.lease_start = None;
            debug!(object = %self.object, "released idle stripe lock");
        }
    }

    /// Wait out the op's completions under the lock mutex, then clear
    /// the holder. The store cookie stays held; the next acquirer rides
    /// it through the fast path, or `manage_idle` reclaims it.
    pub async fn sync_and_reset(&self, op: &Arc<AsyncOp>) {
        let mut state = self.state.lock().await;
        let _ = op.wait().await;
        state.holder = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn locker(store: &Arc<MemoryStore>, lease_secs: u64) -> StripeLocker {
        StripeLocker::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            "inode".to_owned(),
            Duration::from_secs(lease_secs),
        )
    }

    #[tokio::test]
    async fn same_holder_renews_through_the_fast_path() {
        let store = Arc::new(MemoryStore::new());
        let locker = locker(&store, 10);
        let id = Uuid::new_v4();
        locker.acquire_shared(id).await.unwrap();
        // Second acquisition coalesces without another store round trip.
        locker.acquire_shared(id).await.unwrap();
    }

    #[tokio::test]
    async fn empty_holder_is_claimed_within_the_lease() {
        let store = Arc::new(MemoryStore::new());
        let locker = locker(&store, 10);
        let first = Uuid::new_v4();
        locker.acquire_shared(first).await.unwrap();
        let op = AsyncOp::new();
        op.set_ready();
        locker.sync_and_reset(&op).await;

        // A different op claims the live lease locally; the store-side
        // cookie is never re-acquired.
        let second = Uuid::new_v4();
        locker.acquire_exclusive(second).await.unwrap();
    }

    #[tokio::test]
    async fn idle_release_is_a_one_shot() {
        let store = Arc::new(MemoryStore::new());
        let locker = locker(&store, 10);
        let id = Uuid::new_v4();
        locker.acquire_shared(id).await.unwrap();
        let op = AsyncOp::new();
        op.set_ready();
        locker.sync_and_reset(&op).await;

        locker.manage_idle(Duration::ZERO).await;
        let err = store
            .unlock("inode", STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_SHARED)
            .await
            .unwrap_err();
        assert!(is_errno(&err, Errno::ENOENT));

        // Lease now marked expired; repeated calls are no-ops.
        locker.manage_idle(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn idle_release_skips_a_held_lock() {
        let store = Arc::new(MemoryStore::new());
        let locker = locker(&store, 10);
        locker.acquire_shared(Uuid::new_v4()).await.unwrap();
        locker.manage_idle(Duration::ZERO).await;
        // Still held: unlocking succeeds exactly once.
        store
            .unlock("inode", STRIPE_LOCK_NAME, STRIPE_LOCK_COOKIE_SHARED)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exclusive_waits_for_a_foreign_shared_lease() {
        let store = Arc::new(MemoryStore::new());
        // A foreign client holds the shared cookie briefly.
        store
            .lock_shared(
                "inode",
                STRIPE_LOCK_NAME,
                STRIPE_LOCK_COOKIE_SHARED,
                STRIPE_LOCK_TAG,
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        let locker = locker(&store, 2);
        let started = Instant::now();
        locker.acquire_exclusive(Uuid::new_v4()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
