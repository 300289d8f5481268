use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::io::FileIoMap;

/// Background maintenance over the engine registry: periodically
/// releases idle advisory locks and evicts (and tears down) instances
/// nobody references anymore.
pub struct IdleLockReaper {
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IdleLockReaper {
    pub fn start(map: Arc<FileIoMap>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let worker_shutdown = shutdown.clone();

        let worker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = worker_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        map.manage_idle_locks().await;
                        for inode in map.inodes() {
                            if let Some(io) = map.evict_if_unreferenced(&inode) {
                                debug!(inode = %inode, "evicting unreferenced engine instance");
                                io.close().await;
                            }
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::io::FileIo;
    use crate::store::{MemoryStore, ObjectStore};

    #[tokio::test]
    async fn reaper_evicts_unreferenced_instances() {
        let store = Arc::new(MemoryStore::new());
        let map = Arc::new(FileIoMap::new());
        map.get_or_insert("ino", || {
            FileIo::new(
                Arc::clone(&store) as Arc<dyn ObjectStore>,
                &EngineConfig::default(),
                "ino",
            )
        });

        let reaper = IdleLockReaper::start(Arc::clone(&map), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        reaper.shutdown().await;

        assert!(map.lookup("ino").is_none());
    }
}
