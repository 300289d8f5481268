use super::*;

impl FileIo {
    pub async fn truncate(&self, new_size: u64) -> Result<()> {
        if new_size > self.pool_max_file_size {
            return Err(errno_err(
                Errno::EFBIG,
                format!(
                    "truncate to {new_size} exceeds the pool's maximum file size {}",
                    self.pool_max_file_size
                ),
            ));
        }

        if let Err(err) = self.ops.sync_all().await {
            debug!(inode = %self.inode, error = %err, "pending ops finished with an error before truncate");
        }

        if let Some(inline) = self.inline() {
            inline.truncate(new_size).await?;
        }

        self.update_mtime_async();

        let op = AsyncOp::new();
        let op_id = op.id();

        self.locker.release_shared().await;
        self.locker.acquire_exclusive(op_id).await?;

        let (last_stripe, current_size) = match self.last_stripe_index_and_size().await {
            Ok(value) => value,
            // Never written: truncate from an empty file.
            Err(err) if is_errno(&err, Errno::ENOENT) => (0, 0),
            Err(err) => return Err(err),
        };

        let new_last_stripe = if new_size == 0 {
            0
        } else {
            (new_size - 1) / self.stripe_size
        };
        let truncate_down = current_size > new_size;
        let total_stripes = if truncate_down {
            last_stripe - new_last_stripe + 1
        } else {
            1
        };
        let new_last_stripe_size = last_stripe_payload(new_size, self.stripe_size);

        self.set_size(new_size).await?;

        debug!(
            inode = %self.inode,
            op = %op_id,
            new_size,
            new_last_stripe,
            total_stripes,
            "truncating inode"
        );

        self.ops.register(&op);

        for i in (0..total_stripes).rev() {
            self.locker.acquire_exclusive(op_id).await?;

            let stripe = stripe_object_name(&self.inode, new_last_stripe + i);
            let store = Arc::clone(&self.store);
            let object = stripe.clone();
            let handle = if i == 0 {
                // The new-last stripe is never deleted: on alignment
                // pools the out-of-range tail is zeroed in place, on
                // others the object itself is truncated. Both assert
                // that the object exists.
                if self.pool_alignment > 0 {
                    let zeros = vec![0_u8; (self.stripe_size - new_last_stripe_size) as usize];
                    self.completion_task("truncate", stripe, op_id, async move {
                        store.stat(&object).await?;
                        if zeros.is_empty() {
                            return Ok(());
                        }
                        store.write(&object, new_last_stripe_size, &zeros).await
                    })
                } else {
                    self.completion_task("truncate", stripe, op_id, async move {
                        store.truncate(&object, new_last_stripe_size).await
                    })
                }
            } else {
                self.completion_task("remove", stripe, op_id, async move {
                    store.remove(&object).await
                })
            };
            op.add_completion(handle);
        }

        op.set_ready();
        self.locker.sync_and_reset(&op).await;
        Ok(())
    }

    /// Delete every stripe of the file. `ENOENT` when the file is
    /// already gone.
    pub async fn remove(&self) -> Result<()> {
        if let Err(err) = self.ops.sync_all().await {
            debug!(inode = %self.inode, error = %err, "pending ops finished with an error before remove");
        }

        self.locker.release_shared().await;

        let op = AsyncOp::new();
        let op_id = op.id();
        self.locker.acquire_exclusive(op_id).await?;

        let (last_stripe, _) = self.last_stripe_index_and_size().await?;

        debug!(inode = %self.inode, op = %op_id, last_stripe, "removing inode");

        self.ops.register(&op);

        // Base stripe first: concurrent openers see the inode vanish
        // as soon as possible.
        for index in 0..=last_stripe {
            self.locker.acquire_exclusive(op_id).await?;

            let stripe = stripe_object_name(&self.inode, index);
            let store = Arc::clone(&self.store);
            let object = stripe.clone();
            op.add_completion(self.completion_task("remove", stripe, op_id, async move {
                store.remove(&object).await
            }));
        }

        op.set_ready();
        self.locker.sync_and_reset(&op).await;
        Ok(())
    }
}
