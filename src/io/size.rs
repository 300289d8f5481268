use super::*;

impl FileIo {
    /// Fetch the authoritative size from the base object's omap and
    /// derive the last stripe index. Asserts base-object existence:
    /// `ENOENT` propagates to the caller.
    pub(crate) async fn last_stripe_index_and_size(&self) -> Result<(u64, u64)> {
        let entries = self.store.omap_get(&self.inode, &[FILE_SIZE_KEY]).await?;
        let size = match entries.get(FILE_SIZE_KEY) {
            Some(raw) => crate::types::decode_size_hex(raw)?,
            None => 0,
        };
        let last_stripe = if size > 0 {
            (size - 1) / self.stripe_size
        } else {
            0
        };
        Ok((last_stripe, size))
    }

    /// Current file size; a missing base object reads as 0.
    pub async fn size(&self) -> u64 {
        self.last_stripe_index_and_size()
            .await
            .map(|(_, size)| size)
            .unwrap_or(0)
    }

    fn size_entries(&self, size: u64) -> HashMap<String, Vec<u8>> {
        let mut entries = HashMap::new();
        entries.insert(
            FILE_SIZE_KEY.to_owned(),
            encode_size_hex(size, self.size_hex_width).into_bytes(),
        );
        if self.pool_alignment > 0 {
            entries.insert(
                LAST_STRIPE_SIZE_KEY.to_owned(),
                last_stripe_payload(size, self.stripe_size)
                    .to_string()
                    .into_bytes(),
            );
        }
        entries
    }

    /// Grow-only size update: one compound store op guarded by the
    /// lexicographic comparison `stored(file_size) < hex(size)`. A
    /// failed predicate means another writer already grew the size past
    /// ours and counts as success.
    pub(crate) async fn set_size_if_bigger(&self, size: u64) -> Result<()> {
        let hex = encode_size_hex(size, self.size_hex_width);
        let guard = OmapCompare::less_than(FILE_SIZE_KEY, hex.into_bytes());
        let attempt = self
            .store
            .omap_set_with_cmp(&self.inode, self.size_entries(size), &[guard])
            .await;
        match attempt {
            Ok(()) => {
                debug!(inode = %self.inode, size, "grew file size");
                Ok(())
            }
            Err(err) if is_errno(&err, Errno::ECANCELED) => {
                debug!(inode = %self.inode, size, "file size already grown past ours");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Unconditional size update; the only operation allowed to shrink
    /// the size. Creates the base object when missing.
    pub(crate) async fn set_size(&self, size: u64) -> Result<()> {
        self.store.omap_set(&self.inode, self.size_entries(size)).await?;
        debug!(inode = %self.inode, size, "set file size");
        Ok(())
    }

    /// Fire-and-forget mtime refresh on the base object's xattr.
    pub(crate) fn update_mtime_async(&self) {
        let store = Arc::clone(&self.store);
        let inode = self.inode.clone();
        tokio::spawn(async move {
            let stamp = mtime_stamp(SystemTime::now());
            if let Err(err) = store.set_xattr(&inode, MTIME_XATTR, stamp.as_bytes()).await {
                debug!(inode = %inode, error = %err, "mtime update failed");
            }
        });
    }
}
