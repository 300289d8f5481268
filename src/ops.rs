use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use nix::errno::Errno;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::types::{errno_err, errno_of};

#[derive(Default)]
struct OpInner {
    ready: bool,
    completions: Vec<JoinHandle<Result<()>>>,
    draining: usize,
    first_error: Option<(Errno, String)>,
}

/// One logical asynchronous operation aggregating store completions.
///
/// The submitter attaches completions while scheduling store calls and
/// then calls [`AsyncOp::set_ready`] exactly once; waiters block until
/// the op is ready and every completion has finalized. All waiters
/// observe the same final status: the first non-zero one recorded.
pub struct AsyncOp {
    id: Uuid,
    inner: Mutex<OpInner>,
    progress: Notify,
}

impl AsyncOp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            inner: Mutex::new(OpInner::default()),
            progress: Notify::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_completion(&self, handle: JoinHandle<Result<()>>) {
        self.inner.lock().completions.push(handle);
        self.progress.notify_waiters();
    }

    /// Record a submission-side failure. Only the first error sticks.
    pub fn fail(&self, err: &anyhow::Error) {
        let mut inner = self.inner.lock();
        if inner.first_error.is_none() {
            inner.first_error = Some((errno_of(err).unwrap_or(Errno::EIO), err.to_string()));
        }
    }

    /// Called by the submitter once no further completions will be
    /// attached.
    pub fn set_ready(&self) {
        self.inner.lock().ready = true;
        self.progress.notify_waiters();
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Wait until the op is ready and all completions have finalized.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.progress.notified();
            let pending = {
                let mut inner = self.inner.lock();
                if inner.completions.is_empty() {
                    if inner.ready && inner.draining == 0 {
                        return match &inner.first_error {
                            None => Ok(()),
                            Some((errno, message)) => Err(errno_err(*errno, message.clone())),
                        };
                    }
                    Vec::new()
                } else {
                    let taken = std::mem::take(&mut inner.completions);
                    inner.draining += taken.len();
                    taken
                }
            };

            if pending.is_empty() {
                notified.await;
                continue;
            }

            for handle in pending {
                let status = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(errno_err(
                        Errno::EIO,
                        format!("completion task aborted: {join_err}"),
                    )),
                };
                let mut inner = self.inner.lock();
                if let Err(err) = status {
                    if inner.first_error.is_none() {
                        inner.first_error =
                            Some((errno_of(&err).unwrap_or(Errno::EIO), err.to_string()));
                    }
                }
                inner.draining -= 1;
            }
            self.progress.notify_waiters();
        }
    }
}

/// Tracks in-flight operations by id on behalf of one engine instance.
#[derive(Default)]
pub struct OpManager {
    ops: Mutex<HashMap<Uuid, Arc<AsyncOp>>>,
}

impl OpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, op: &Arc<AsyncOp>) {
        self.ops.lock().insert(op.id(), Arc::clone(op));
    }

    /// Wait a single op to completion and retire it. `ENOENT` when the
    /// id is unknown (never submitted, or already retired).
    pub async fn sync_op(&self, id: Uuid) -> Result<()> {
        let op = self.ops.lock().get(&id).cloned();
        let Some(op) = op else {
            return Err(errno_err(Errno::ENOENT, format!("unknown op {id}")));
        };
        let status = op.wait().await;
        self.ops.lock().remove(&id);
        status
    }

    /// Wait out every registered op and retire them all; the first
    /// error observed wins.
    pub async fn sync_all(&self) -> Result<()> {
        let pending: Vec<Arc<AsyncOp>> = self.ops.lock().drain().map(|(_, op)| op).collect();
        let statuses = futures::future::join_all(pending.iter().map(|op| op.wait())).await;
        statuses.into_iter().find(|s| s.is_err()).unwrap_or(Ok(()))
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::is_errno;

    #[tokio::test]
    async fn wait_returns_after_ready_and_completions() {
        let op = AsyncOp::new();
        op.add_completion(tokio::spawn(async { Ok(()) }));
        op.add_completion(tokio::spawn(async { Ok(()) }));
        op.set_ready();
        op.wait().await.unwrap();
    }

    #[tokio::test]
    async fn first_error_wins() {
        let op = AsyncOp::new();
        op.add_completion(tokio::spawn(async {
            Err(errno_err(Errno::EIO, "stripe write failed"))
        }));
        op.add_completion(tokio::spawn(async {
            Err(errno_err(Errno::ENOENT, "second failure"))
        }));
        op.set_ready();
        let err = op.wait().await.unwrap_err();
        assert!(is_errno(&err, Errno::EIO));
    }

    #[tokio::test]
    async fn wait_blocks_until_set_ready() {
        let op = AsyncOp::new();
        let waiter = {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        op.set_ready();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn all_waiters_observe_the_same_status() {
        let op = AsyncOp::new();
        op.add_completion(tokio::spawn(async {
            Err(errno_err(Errno::EIO, "boom"))
        }));
        op.set_ready();
        let a = {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait().await })
        };
        let b = {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait().await })
        };
        assert!(is_errno(&a.await.unwrap().unwrap_err(), Errno::EIO));
        assert!(is_errno(&b.await.unwrap().unwrap_err(), Errno::EIO));
    }

    #[tokio::test]
    async fn sync_op_retires_and_unknown_id_is_enoent() {
        let mgr = OpManager::new();
        let op = AsyncOp::new();
        mgr.register(&op);
        op.set_ready();
        mgr.sync_op(op.id()).await.unwrap();
        let err = mgr.sync_op(op.id()).await.unwrap_err();
        assert!(is_errno(&err, Errno::ENOENT));
    }

    #[tokio::test]
    async fn sync_all_drains_every_op() {
        let mgr = OpManager::new();
        for _ in 0..3 {
            let op = AsyncOp::new();
            op.add_completion(tokio::spawn(async { Ok(()) }));
            op.set_ready();
            mgr.register(&op);
        }
        mgr.sync_all().await.unwrap();
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn submission_failure_is_reported() {
        let mgr = OpManager::new();
        let op = AsyncOp::new();
        mgr.register(&op);
        op.fail(&errno_err(Errno::EFBIG, "write beyond pool size"));
        op.set_ready();
        let err = mgr.sync_op(op.id()).await.unwrap_err();
        assert!(is_errno(&err, Errno::EFBIG));
    }
}
