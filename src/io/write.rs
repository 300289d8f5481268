use super::*;

impl FileIo {
    fn verify_write_params(&self, offset: u64, len: usize) -> Result<()> {
        if len == 0 {
            return Err(errno_err(Errno::EINVAL, "cannot write 0 bytes"));
        }
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.pool_max_file_size => Ok(()),
            _ => Err(errno_err(
                Errno::EFBIG,
                format!(
                    "write of {len} bytes at {offset} exceeds the pool's maximum file size {}",
                    self.pool_max_file_size
                ),
            )),
        }
    }

    /// Submit an asynchronous write and return its op id immediately.
    /// The buffer's ownership transfers to the engine; failures are
    /// reported when the op is synced.
    pub fn write(self: Arc<Self>, data: Vec<u8>, offset: u64) -> Result<Uuid> {
        self.verify_write_params(offset, data.len())?;

        let op = AsyncOp::new();
        self.ops.register(&op);
        let id = op.id();

        let io = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(err) = io.real_write(data, offset, &op).await {
                debug!(inode = %io.inode, op = %op.id(), error = %err, "scheduled write failed");
                op.fail(&err);
                op.set_ready();
            }
        });

        Ok(id)
    }

    /// Write synchronously on the caller, returning the op's aggregated
    /// status (first error observed across its stripes).
    pub async fn write_sync(&self, data: &[u8], offset: u64) -> Result<()> {
        self.verify_write_params(offset, data.len())?;

        let op = AsyncOp::new();
        self.ops.register(&op);

        let submitted = self.real_write(data.to_vec(), offset, &op).await;
        if let Err(err) = &submitted {
            op.fail(err);
            op.set_ready();
        }
        let status = op.wait().await;
        // Retire the op; a concurrent barrier may already have done so.
        let _ = self.ops.sync_op(op.id()).await;
        submitted.and(status)
    }

    pub(crate) async fn real_write(
        &self,
        mut data: Vec<u8>,
        mut offset: u64,
        op: &Arc<AsyncOp>,
    ) -> Result<()> {
        if let Some(inline) = self.inline() {
            let absorbed = if offset < inline.capacity() {
                inline.write(&data, offset).await?
            } else {
                // The write starts past the inline region; make sure no
                // partial inline state remains behind it.
                inline.fill_remaining().await?;
                0
            };
            if absorbed > 0 {
                offset += absorbed as u64;
                data.drain(..absorbed);
            }
            if data.is_empty() {
                op.set_ready();
                return Ok(());
            }
        }

        self.update_mtime_async();

        let len = data.len() as u64;
        let first_stripe = offset / self.stripe_size;
        let last_stripe = (offset + len - 1) / self.stripe_size;
        let total_stripes = last_stripe - first_stripe + 1;
        let op_id = op.id();
        // Multi-stripe writes serialize under the exclusive lock so
        // readers rarely observe torn stripe boundaries; single-stripe
        // writers share.
        let exclusive = total_stripes > 1;

        self.acquire_stripe_lock(exclusive, op_id).await?;
        self.set_size_if_bigger(offset + len).await?;

        debug!(
            inode = %self.inode,
            op = %op_id,
            size = offset + len,
            first_stripe,
            last_stripe,
            "writing stripes"
        );

        let mut in_stripe_off = offset % self.stripe_size;
        let mut remaining = data.len();
        for i in 0..total_stripes {
            self.acquire_stripe_lock(exclusive, op_id).await?;

            let stripe = stripe_object_name(&self.inode, first_stripe + i);
            let take = min(self.stripe_size - in_stripe_off, remaining as u64) as usize;
            let start = data.len() - remaining;
            let mut payload = data[start..start + take].to_vec();
            if self.pool_alignment > 0 {
                // Alignment pools hold every stripe at its full size;
                // pad the slice out to the stripe's end.
                let padded = (self.stripe_size - in_stripe_off) as usize;
                if payload.len() < padded {
                    payload.resize(padded, 0);
                }
            }

            let store = Arc::clone(&self.store);
            let object = stripe.clone();
            let write_off = in_stripe_off;
            op.add_completion(self.completion_task("write", stripe, op_id, async move {
                store.write(&object, write_off, &payload).await
            }));

            in_stripe_off = 0;
            remaining -= take;
        }

        op.set_ready();
        self.locker.sync_and_reset(op).await;
        Ok(())
    }
}
