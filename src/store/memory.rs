use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use nix::errno::Errno;
use parking_lot::Mutex;

use crate::store::{ObjectStore, OmapCompare};
use crate::types::errno_err;

#[derive(Debug, Clone)]
struct LockHolder {
    cookie: String,
    shared: bool,
    expires_at: Instant,
}

#[derive(Debug, Default, Clone)]
struct LockRecord {
    tag: String,
    holders: Vec<LockHolder>,
}

impl LockRecord {
    fn prune_expired(&mut self, now: Instant) {
        self.holders.retain(|h| h.expires_at > now);
    }
}

#[derive(Debug, Default)]
struct Object {
    data: Vec<u8>,
    omap: BTreeMap<String, Vec<u8>>,
    xattrs: HashMap<String, Vec<u8>>,
    locks: HashMap<String, LockRecord>,
}

/// In-process [`ObjectStore`] backend. Complete enough to stand in for
/// a real pool: sparse writes, omap compare-and-set, and lease-bounded
/// advisory locks with wall-clock expiry.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Object>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object names currently present, sorted. Test helper.
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, obj: &str) -> bool {
        self.objects.lock().contains_key(obj)
    }

    fn missing(obj: &str) -> anyhow::Error {
        errno_err(Errno::ENOENT, format!("object {obj:?} does not exist"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read(&self, obj: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let objects = self.objects.lock();
        let object = objects.get(obj).ok_or_else(|| Self::missing(obj))?;
        let start = offset.min(object.data.len() as u64) as usize;
        let end = (offset + len).min(object.data.len() as u64) as usize;
        Ok(object.data[start..end].to_vec())
    }

    async fn write(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        let end = offset as usize + data.len();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn truncate(&self, obj: &str, new_len: u64) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.get_mut(obj).ok_or_else(|| Self::missing(obj))?;
        object.data.resize(new_len as usize, 0);
        Ok(())
    }

    async fn remove(&self, obj: &str) -> Result<()> {
        let mut objects = self.objects.lock();
        objects.remove(obj).map(|_| ()).ok_or_else(|| Self::missing(obj))
    }

    async fn stat(&self, obj: &str) -> Result<u64> {
        let objects = self.objects.lock();
        let object = objects.get(obj).ok_or_else(|| Self::missing(obj))?;
        Ok(object.data.len() as u64)
    }

    async fn omap_get(&self, obj: &str, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        let objects = self.objects.lock();
        let object = objects.get(obj).ok_or_else(|| Self::missing(obj))?;
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = object.omap.get(*key) {
                out.insert((*key).to_owned(), value.clone());
            }
        }
        Ok(out)
    }

    async fn omap_set(&self, obj: &str, entries: HashMap<String, Vec<u8>>) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        object.omap.extend(entries);
        Ok(())
    }

    async fn omap_set_with_cmp(
        &self,
        obj: &str,
        entries: HashMap<String, Vec<u8>>,
        compares: &[OmapCompare],
    ) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        for cmp in compares {
            let stored = object
                .omap
                .get(&cmp.key)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if !cmp.holds(stored) {
                return Err(errno_err(
                    Errno::ECANCELED,
                    format!("omap comparison failed for key {:?} on {obj:?}", cmp.key),
                ));
            }
        }
        object.omap.extend(entries);
        Ok(())
    }

    async fn get_xattr(&self, obj: &str, name: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock();
        let object = objects.get(obj).ok_or_else(|| Self::missing(obj))?;
        object.xattrs.get(name).cloned().ok_or_else(|| {
            errno_err(Errno::ENOENT, format!("xattr {name:?} not set on {obj:?}"))
        })
    }

    async fn set_xattr(&self, obj: &str, name: &str, value: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        object.xattrs.insert(name.to_owned(), value.to_vec());
        Ok(())
    }

    async fn lock_shared(
        &self,
        obj: &str,
        name: &str,
        cookie: &str,
        tag: &str,
        duration: Duration,
    ) -> Result<()> {
        let now = Instant::now();
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        let record = object.locks.entry(name.to_owned()).or_default();
        record.prune_expired(now);
        if record
            .holders
            .iter()
            .any(|h| !h.shared && h.cookie != cookie)
        {
            return Err(errno_err(
                Errno::EBUSY,
                format!("lock {name:?} on {obj:?} held exclusively"),
            ));
        }
        record.tag = tag.to_owned();
        record.holders.retain(|h| h.cookie != cookie);
        record.holders.push(LockHolder {
            cookie: cookie.to_owned(),
            shared: true,
            expires_at: now + duration,
        });
        Ok(())
    }

    async fn lock_exclusive(
        &self,
        obj: &str,
        name: &str,
        cookie: &str,
        duration: Duration,
    ) -> Result<()> {
        let now = Instant::now();
        let mut objects = self.objects.lock();
        let object = objects.entry(obj.to_owned()).or_default();
        let record = object.locks.entry(name.to_owned()).or_default();
        record.prune_expired(now);
        if record.holders.iter().any(|h| h.cookie != cookie) {
            return Err(errno_err(
                Errno::EBUSY,
                format!("lock {name:?} on {obj:?} already held"),
            ));
        }
        record.holders.retain(|h| h.cookie != cookie);
        record.holders.push(LockHolder {
            cookie: cookie.to_owned(),
            shared: false,
            expires_at: now + duration,
        });
        Ok(())
    }

    async fn unlock(&self, obj: &str, name: &str, cookie: &str) -> Result<()> {
        let mut objects = self.objects.lock();
        let object = objects.get_mut(obj).ok_or_else(|| Self::missing(obj))?;
        let record = object.locks.get_mut(name).ok_or_else(|| {
            errno_err(Errno::ENOENT, format!("lock {name:?} not held on {obj:?}"))
        })?;
        let before = record.holders.len();
        record.holders.retain(|h| h.cookie != cookie);
        if record.holders.len() == before {
            return Err(errno_err(
                Errno::ENOENT,
                format!("cookie {cookie:?} does not hold lock {name:?} on {obj:?}"),
            ));
        }
        Ok(())
    }
}
