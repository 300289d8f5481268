use parking_lot::Mutex;

use super::*;

/// By-inode registry of engine instances: the containing filesystem's
/// eviction root. An instance whose only reference lives here has no
/// external users and may be evicted or have its idle lock reclaimed.
#[derive(Default)]
pub struct FileIoMap {
    inner: Mutex<HashMap<String, Arc<FileIo>>>,
}

impl FileIoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, inode: &str) -> Option<Arc<FileIo>> {
        self.inner.lock().get(inode).cloned()
    }

    pub fn get_or_insert(
        &self,
        inode: &str,
        make: impl FnOnce() -> Arc<FileIo>,
    ) -> Arc<FileIo> {
        let mut map = self.inner.lock();
        if let Some(io) = map.get(inode) {
            return Arc::clone(io);
        }
        let io = make();
        map.insert(inode.to_owned(), Arc::clone(&io));
        io
    }

    pub fn inodes(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    /// True when the caller's clone and the map's reference are the
    /// only two, meaning no other client is using the instance.
    pub fn has_single_client(io: &Arc<FileIo>) -> bool {
        Arc::strong_count(io) == 2
    }

    /// Drop the map's entry when it holds the only remaining reference,
    /// handing the instance back so the caller can run its teardown.
    pub fn evict_if_unreferenced(&self, inode: &str) -> Option<Arc<FileIo>> {
        let mut map = self.inner.lock();
        match map.get(inode) {
            Some(io) if Arc::strong_count(io) == 1 => map.remove(inode),
            _ => None,
        }
    }

    /// Sweep every registered instance for an idle advisory lock.
    pub async fn manage_idle_locks(&self) {
        let instances: Vec<Arc<FileIo>> = self.inner.lock().values().cloned().collect();
        for io in instances {
            io.manage_idle_lock().await;
        }
    }
}
