use std::sync::Arc;

use anyhow::Result;
use nix::errno::Errno;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::io::FileIo;
use crate::types::{errno_err, is_errno};

/// Per-open surface over a shared engine instance. Operations on an
/// unbound handle report `ENODEV`; asynchronous writes are tracked per
/// handle so [`FileHandle::sync`] covers exactly this handle's
/// submissions.
pub struct FileHandle {
    io: Option<Arc<FileIo>>,
    pending_writes: Mutex<Vec<Uuid>>,
}

impl FileHandle {
    pub fn new(io: Arc<FileIo>) -> Self {
        Self {
            io: Some(io),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    /// A handle with no engine behind it, as handed out when the pool
    /// lookup failed.
    pub fn unbound() -> Self {
        Self {
            io: None,
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    fn io(&self) -> Result<&Arc<FileIo>> {
        self.io
            .as_ref()
            .ok_or_else(|| errno_err(Errno::ENODEV, "handle is not bound to an engine instance"))
    }

    pub fn inode(&self) -> Option<&str> {
        self.io.as_ref().map(|io| io.inode())
    }

    pub async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.io()?.read(buf, offset).await
    }

    pub fn write(&self, data: Vec<u8>, offset: u64) -> Result<Uuid> {
        let io = self.io()?;
        let id = Arc::clone(io).write(data, offset)?;
        self.pending_writes.lock().push(id);
        Ok(id)
    }

    pub async fn write_sync(&self, data: &[u8], offset: u64) -> Result<()> {
        self.io()?.write_sync(data, offset).await
    }

    pub async fn truncate(&self, new_size: u64) -> Result<()> {
        self.io()?.truncate(new_size).await
    }

    pub async fn remove(&self) -> Result<()> {
        self.io()?.remove().await
    }

    pub async fn size(&self) -> Result<u64> {
        Ok(self.io()?.size().await)
    }

    /// Wait out this handle's submitted writes; first error wins. Ops
    /// already retired by an engine-level barrier are skipped.
    pub async fn sync(&self) -> Result<()> {
        let io = self.io()?;
        let pending: Vec<Uuid> = std::mem::take(&mut *self.pending_writes.lock());
        let mut first_error = None;
        for id in pending {
            match io.sync_op(id).await {
                Ok(()) => {}
                Err(err) if is_errno(&err, Errno::ENOENT) => {}
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
