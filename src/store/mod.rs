use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryStore;

/// Comparison applied to a stored omap value; an absent key compares as
/// the empty byte string. The predicate reads `stored OP provided`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmapCompareOp {
    Eq,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
pub struct OmapCompare {
    pub key: String,
    pub value: Vec<u8>,
    pub op: OmapCompareOp,
}

impl OmapCompare {
    pub fn less_than(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            op: OmapCompareOp::Lt,
        }
    }

    pub(crate) fn holds(&self, stored: &[u8]) -> bool {
        match self.op {
            OmapCompareOp::Eq => stored == self.value.as_slice(),
            OmapCompareOp::Lt => stored < self.value.as_slice(),
            OmapCompareOp::Gt => stored > self.value.as_slice(),
        }
    }
}

/// Minimal surface of the backing object store.
///
/// Error categories are carried as `nix::errno::Errno` root causes:
/// `ENOENT` (object absent), `EEXIST`, `EBUSY` (lock contention),
/// `ECANCELED` (comparison predicate failed), `EIO` (anything else).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read up to `len` bytes at `offset`. Returns short when the
    /// object ends before `offset + len`; `ENOENT` when it is absent.
    async fn read(&self, obj: &str, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, creating the object when absent and
    /// zero-extending any gap below `offset`.
    async fn write(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// Truncate the object's data to `new_len`. Asserts existence.
    async fn truncate(&self, obj: &str, new_len: u64) -> Result<()>;

    async fn remove(&self, obj: &str) -> Result<()>;

    /// Byte length of the object's data.
    async fn stat(&self, obj: &str) -> Result<u64>;

    /// Fetch the requested omap entries. Asserts existence; absent keys
    /// are simply missing from the result.
    async fn omap_get(&self, obj: &str, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>>;

    /// Set omap entries, creating the object when absent.
    async fn omap_set(&self, obj: &str, entries: HashMap<String, Vec<u8>>) -> Result<()>;

    /// Atomically set omap entries when every comparison holds; a
    /// failed predicate returns `ECANCELED` and mutates nothing.
    async fn omap_set_with_cmp(
        &self,
        obj: &str,
        entries: HashMap<String, Vec<u8>>,
        compares: &[OmapCompare],
    ) -> Result<()>;

    async fn get_xattr(&self, obj: &str, name: &str) -> Result<Vec<u8>>;

    async fn set_xattr(&self, obj: &str, name: &str, value: &[u8]) -> Result<()>;

    /// Take the named advisory lock in shared mode. Creates the object
    /// when absent. `EBUSY` while a conflicting lock is live; re-locking
    /// with the same cookie renews the lease.
    async fn lock_shared(
        &self,
        obj: &str,
        name: &str,
        cookie: &str,
        tag: &str,
        duration: Duration,
    ) -> Result<()>;

    /// Take the named advisory lock in exclusive mode.
    async fn lock_exclusive(
        &self,
        obj: &str,
        name: &str,
        cookie: &str,
        duration: Duration,
    ) -> Result<()>;

    /// Release the lock held under `cookie`; `ENOENT` when not held.
    async fn unlock(&self, obj: &str, name: &str, cookie: &str) -> Result<()>;
}
