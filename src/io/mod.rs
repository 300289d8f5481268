use std::cmp::min;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use nix::errno::Errno;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, LogLevel};
use crate::inline::{InlineBinding, InlineBuffer};
use crate::lock::StripeLocker;
use crate::ops::{AsyncOp, OpManager};
use crate::store::{ObjectStore, OmapCompare};
use crate::types::{
    align_stripe_size, encode_size_hex, errno_err, is_errno, last_stripe_payload, mtime_stamp,
    size_hex_width, stripe_object_name, FILE_SIZE_KEY, LAST_STRIPE_SIZE_KEY, MTIME_XATTR,
};

mod map;
mod size;
mod truncate;
mod write;

pub use map::FileIoMap;

/// Striped I/O engine for one inode: a linear byte-addressable file
/// backed by a sequence of fixed-size objects in the pool. Holds no
/// persistent open state; all durability lives in the backing store.
/// Instances are shared under `Arc`; the containing filesystem keeps
/// one reference in its by-inode map (see [`FileIoMap`]).
pub struct FileIo {
    store: Arc<dyn ObjectStore>,
    inode: String,
    stripe_size: u64,
    pool_alignment: u64,
    pool_max_file_size: u64,
    size_hex_width: usize,
    inline_capacity: u64,
    completion_debug: bool,
    lock_idle_timeout: Duration,
    ops: OpManager,
    locker: StripeLocker,
    inline: RwLock<Option<Arc<InlineBuffer>>>,
    lazy_removal: AtomicBool,
    closed: AtomicBool,
}

impl FileIo {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: &EngineConfig,
        inode: impl Into<String>,
    ) -> Arc<Self> {
        let inode = inode.into();
        let stripe_size = align_stripe_size(config.stripe_size, config.pool_alignment);
        let locker = StripeLocker::new(
            Arc::clone(&store),
            inode.clone(),
            Duration::from_secs(config.lock_lease_secs),
        );
        Arc::new(Self {
            store,
            inode,
            stripe_size,
            pool_alignment: config.pool_alignment,
            pool_max_file_size: config.pool_max_file_size,
            size_hex_width: size_hex_width(config.pool_max_file_size),
            inline_capacity: config.inline_capacity,
            completion_debug: config.log_level == LogLevel::Debug,
            lock_idle_timeout: Duration::from_secs(config.lock_idle_secs),
            ops: OpManager::new(),
            locker,
            inline: RwLock::new(None),
            lazy_removal: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn inode(&self) -> &str {
        &self.inode
    }

    pub fn stripe_size(&self) -> u64 {
        self.stripe_size
    }

    /// Bind the inline fast path to this file's parent-directory index
    /// entry. No-op when the engine was configured without an inline
    /// capacity.
    pub fn set_inline_buffer(&self, binding: InlineBinding) {
        if self.inline_capacity == 0 {
            return;
        }
        let buffer = InlineBuffer::new(Arc::clone(&self.store), binding, self.inline_capacity);
        *self.inline.write() = Some(Arc::new(buffer));
    }

    pub(crate) fn inline(&self) -> Option<Arc<InlineBuffer>> {
        self.inline.read().clone()
    }

    /// Read into `buf` at `offset`. The caller is expected to cap the
    /// length at the file size: reading past it is `EOVERFLOW`, not a
    /// short read. Unwritten regions inside the file read as zeros.
    pub async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if let Err(err) = self.ops.sync_all().await {
            debug!(inode = %self.inode, error = %err, "pending ops finished with an error before read");
        }

        if buf.is_empty() {
            return Err(errno_err(Errno::EINVAL, "cannot read 0 bytes"));
        }

        let mut offset = offset;
        let mut bytes_read = 0_usize;

        if let Some(inline) = self.inline() {
            if offset < inline.capacity() {
                let contents = inline.read().await?;
                let available = (contents.len() as u64).saturating_sub(offset) as usize;
                let take = min(buf.len(), available);
                if take > 0 {
                    buf[..take]
                        .copy_from_slice(&contents[offset as usize..offset as usize + take]);
                }
                offset += take as u64;
                bytes_read += take;
                if bytes_read == buf.len() {
                    return Ok(bytes_read);
                }
            }
        }

        let wanted = (buf.len() - bytes_read) as u64;
        let (_, file_size) = self.last_stripe_index_and_size().await?;
        if offset + wanted > file_size {
            return Err(errno_err(
                Errno::EOVERFLOW,
                format!(
                    "read of {wanted} bytes at {offset} past the file's current size {file_size}"
                ),
            ));
        }

        let mut in_stripe_off = offset % self.stripe_size;
        let mut remaining = wanted;
        while remaining > 0 {
            let stripe_index = (offset + (wanted - remaining)) / self.stripe_size;
            let stripe = stripe_object_name(&self.inode, stripe_index);
            let want = min(self.stripe_size - in_stripe_off, remaining);
            let chunk = match self.store.read(&stripe, in_stripe_off, want).await {
                Ok(data) => data,
                // A hole: the stripe was never written.
                Err(err) if is_errno(&err, Errno::ENOENT) => Vec::new(),
                Err(err) => return Err(err),
            };
            debug!(
                object = %stripe,
                offset = in_stripe_off,
                wanted = want,
                got = chunk.len(),
                "read stripe"
            );
            let dst = &mut buf[bytes_read..bytes_read + want as usize];
            dst[..chunk.len()].copy_from_slice(&chunk);
            dst[chunk.len()..].fill(0);
            bytes_read += want as usize;
            remaining -= want;
            in_stripe_off = 0;
        }

        Ok(bytes_read)
    }

    /// Wait out every in-flight op on this inode; first error wins.
    pub async fn sync(&self) -> Result<()> {
        self.ops.sync_all().await
    }

    /// Wait out a single op by id and retire it.
    pub async fn sync_op(&self, id: Uuid) -> Result<()> {
        self.ops.sync_op(id).await
    }

    /// Arrange for teardown to remove the file instead of merely
    /// releasing locks. Also snapshots the inline contents into memory
    /// so teardown never reads the freed parent entry.
    pub async fn set_lazy_removal(&self, remove: bool) -> Result<()> {
        self.lazy_removal.store(remove, Ordering::SeqCst);
        if remove {
            if let Some(inline) = self.inline() {
                inline.enable_memory_mirror().await?;
            }
        }
        Ok(())
    }

    pub fn lazy_removal(&self) -> bool {
        self.lazy_removal.load(Ordering::SeqCst)
    }

    /// Cooperatively release this inode's advisory lock once it has sat
    /// holder-less for the configured idle timeout.
    pub async fn manage_idle_lock(&self) {
        self.locker.manage_idle(self.lock_idle_timeout).await;
    }

    /// Tear the instance down: synchronize everything in flight, then
    /// either lazily remove the file or release the advisory lock.
    /// Idempotent; errors are logged, never returned.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.ops.sync_all().await {
            warn!(inode = %self.inode, error = %err, "outstanding ops failed during teardown");
        }

        if self.lazy_removal() {
            if let Err(err) = self.remove().await {
                if !is_errno(&err, Errno::ENOENT) {
                    warn!(inode = %self.inode, error = %err, "lazy removal failed during teardown");
                }
            }
            return;
        }

        self.locker.release_all().await;
    }

    pub(crate) async fn acquire_stripe_lock(&self, exclusive: bool, op_id: Uuid) -> Result<()> {
        if exclusive {
            self.locker.acquire_exclusive(op_id).await
        } else {
            self.locker.acquire_shared(op_id).await
        }
    }

    /// Spawn a store operation as a tracked completion. With
    /// `log_level = debug` the outcome of every completion is logged,
    /// mirroring per-completion debug callbacks.
    pub(crate) fn completion_task<F>(
        &self,
        action: &'static str,
        object: String,
        op_id: Uuid,
        fut: F,
    ) -> JoinHandle<Result<()>>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let log_completions = self.completion_debug;
        tokio::spawn(async move {
            let result = fut.await;
            if log_completions {
                match &result {
                    Ok(()) => debug!(action, object = %object, op = %op_id, "completed"),
                    Err(err) => {
                        debug!(action, object = %object, op = %op_id, error = %err, "completed with error")
                    }
                }
            }
            result
        })
    }
}
