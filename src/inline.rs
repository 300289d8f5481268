use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use nix::errno::Errno;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::ObjectStore;
use crate::types::is_errno;

/// Where a file's inline contents live: an index entry inside the
/// parent directory's object, keyed by the file's basename. Produced by
/// the directory layer.
#[derive(Debug, Clone)]
pub struct InlineBinding {
    pub parent_object: String,
    pub entry_key: String,
}

struct InlineState {
    /// When set, all operations run against this snapshot instead of
    /// the parent entry. Enabled for lazy-removal teardown so nothing
    /// reads a freed parent slot.
    mirror: Option<Vec<u8>>,
}

/// Fast path for small files: the leading `capacity` bytes of the file,
/// persisted inside the parent directory's index entry rather than as a
/// stripe object. Authoritative for the range `[0, capacity)`.
pub struct InlineBuffer {
    store: Arc<dyn ObjectStore>,
    binding: InlineBinding,
    capacity: u64,
    state: Mutex<InlineState>,
}

impl InlineBuffer {
    pub fn new(store: Arc<dyn ObjectStore>, binding: InlineBinding, capacity: u64) -> Self {
        Self {
            store,
            binding,
            capacity,
            state: Mutex::new(InlineState { mirror: None }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    async fn fetch(&self, state: &InlineState) -> Result<Vec<u8>> {
        if let Some(mirror) = &state.mirror {
            return Ok(mirror.clone());
        }
        let fetched = self
            .store
            .omap_get(&self.binding.parent_object, &[self.binding.entry_key.as_str()])
            .await;
        match fetched {
            Ok(mut entries) => Ok(entries.remove(&self.binding.entry_key).unwrap_or_default()),
            Err(err) if is_errno(&err, Errno::ENOENT) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn persist(&self, state: &mut InlineState, contents: Vec<u8>) -> Result<()> {
        if state.mirror.is_some() {
            state.mirror = Some(contents);
            return Ok(());
        }
        let mut entries = HashMap::new();
        entries.insert(self.binding.entry_key.clone(), contents);
        self.store
            .omap_set(&self.binding.parent_object, entries)
            .await
    }

    /// Current contents; may be shorter than the capacity.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        self.fetch(&state).await
    }

    /// Place `data` at `offset` within `[0, capacity)`, zero-filling
    /// any gap below `offset`. Returns the number of bytes placed. A
    /// write whose end exceeds the capacity pads the contents out to
    /// exactly `capacity` so no partial inline state remains.
    pub async fn write(&self, data: &[u8], offset: u64) -> Result<usize> {
        if offset >= self.capacity {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        let mut contents = self.fetch(&state).await?;
        let end = (offset + data.len() as u64).min(self.capacity);
        let placed = (end - offset) as usize;
        if (contents.len() as u64) < end {
            contents.resize(end as usize, 0);
        }
        contents[offset as usize..end as usize].copy_from_slice(&data[..placed]);
        if offset + data.len() as u64 > self.capacity {
            contents.resize(self.capacity as usize, 0);
        }
        self.persist(&mut state, contents).await?;
        Ok(placed)
    }

    /// Zero-pad the contents out to the capacity. Called when a write
    /// begins strictly beyond the inline region.
    pub async fn fill_remaining(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut contents = self.fetch(&state).await?;
        if (contents.len() as u64) >= self.capacity {
            return Ok(());
        }
        contents.resize(self.capacity as usize, 0);
        self.persist(&mut state, contents).await
    }

    pub async fn truncate(&self, new_size: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut contents = self.fetch(&state).await?;
        let keep = new_size.min(contents.len() as u64) as usize;
        if keep == contents.len() {
            return Ok(());
        }
        contents.truncate(keep);
        self.persist(&mut state, contents).await
    }

    /// Snapshot the contents into memory; every later operation runs
    /// against the snapshot only.
    pub async fn enable_memory_mirror(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.mirror.is_some() {
            return Ok(());
        }
        let contents = self.fetch(&state).await?;
        state.mirror = Some(contents);
        debug!(
            parent = %self.binding.parent_object,
            entry = %self.binding.entry_key,
            "inline buffer switched to memory mirror"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn buffer(store: &Arc<MemoryStore>, capacity: u64) -> InlineBuffer {
        InlineBuffer::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            InlineBinding {
                parent_object: "dir".to_owned(),
                entry_key: "file.inline".to_owned(),
            },
            capacity,
        )
    }

    #[tokio::test]
    async fn write_within_capacity() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 16);
        assert_eq!(inline.write(b"hi", 0).await.unwrap(), 2);
        assert_eq!(inline.read().await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn gap_below_offset_is_zero_filled() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 16);
        assert_eq!(inline.write(b"xy", 4).await.unwrap(), 2);
        assert_eq!(inline.read().await.unwrap(), b"\0\0\0\0xy");
    }

    #[tokio::test]
    async fn overflowing_write_pads_to_capacity() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 8);
        let placed = inline.write(b"abcdefghij", 0).await.unwrap();
        assert_eq!(placed, 8);
        assert_eq!(inline.read().await.unwrap(), b"abcdefgh");

        let placed = inline.write(b"zz", 7).await.unwrap();
        assert_eq!(placed, 1);
        assert_eq!(inline.read().await.unwrap(), b"abcdefgz");
    }

    #[tokio::test]
    async fn write_at_capacity_places_nothing() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 8);
        assert_eq!(inline.write(b"x", 8).await.unwrap(), 0);
        assert_eq!(inline.write(b"x", 20).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fill_remaining_pads_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 16);
        inline.write(b"hi", 0).await.unwrap();
        inline.fill_remaining().await.unwrap();
        let mut expected = b"hi".to_vec();
        expected.resize(16, 0);
        assert_eq!(inline.read().await.unwrap(), expected);
        inline.fill_remaining().await.unwrap();
        assert_eq!(inline.read().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn truncate_shrinks_contents() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 16);
        inline.write(b"abcdef", 0).await.unwrap();
        inline.truncate(3).await.unwrap();
        assert_eq!(inline.read().await.unwrap(), b"abc");
        inline.truncate(10).await.unwrap();
        assert_eq!(inline.read().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn memory_mirror_stops_touching_the_parent() {
        let store = Arc::new(MemoryStore::new());
        let inline = buffer(&store, 16);
        inline.write(b"hello", 0).await.unwrap();
        inline.enable_memory_mirror().await.unwrap();

        store.remove("dir").await.unwrap();
        assert_eq!(inline.read().await.unwrap(), b"hello");
        inline.truncate(2).await.unwrap();
        assert_eq!(inline.read().await.unwrap(), b"he");
        assert!(!store.contains("dir"));
    }
}
