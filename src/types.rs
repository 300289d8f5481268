use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use nix::errno::Errno;

/// Omap key on the base object holding the authoritative file size,
/// as a fixed-width lowercase hex string.
pub const FILE_SIZE_KEY: &str = "file_size";
/// Omap key holding the real payload length of the last stripe.
/// Present only on pools that enforce object alignment.
pub const LAST_STRIPE_SIZE_KEY: &str = "last_stripe_size";
/// Xattr on the base object carrying the last modification timestamp.
pub const MTIME_XATTR: &str = "mtime";

pub const STRIPE_LOCK_NAME: &str = "file-stripe-locker";
pub const STRIPE_LOCK_COOKIE_SHARED: &str = "file-stripe-locker-write";
pub const STRIPE_LOCK_COOKIE_EXCLUSIVE: &str = "file-stripe-locker-other";
pub const STRIPE_LOCK_TAG: &str = "file-stripe";

/// Deterministic stripe object naming, shared by every client of a pool.
/// Index 0 is the base object and carries the inode's metadata.
pub fn stripe_object_name(inode: &str, index: u64) -> String {
    if index == 0 {
        inode.to_owned()
    } else {
        format!("{inode}//{index:016x}")
    }
}

/// Round a stripe size up to the pool's write alignment.
pub fn align_stripe_size(stripe_size: u64, alignment: u64) -> u64 {
    if alignment == 0 || stripe_size % alignment == 0 {
        return stripe_size;
    }
    (stripe_size / alignment + 1) * alignment
}

/// Width of the hex encoding for a pool's maximum file size. All size
/// values are zero-padded to this width so that the store's
/// lexicographic omap comparison orders them numerically.
pub fn size_hex_width(pool_max_file_size: u64) -> usize {
    format!("{pool_max_file_size:x}").len()
}

pub fn encode_size_hex(size: u64, width: usize) -> String {
    format!("{size:0width$x}")
}

pub fn decode_size_hex(raw: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| errno_err(Errno::EIO, "file_size entry is not valid UTF-8"))?;
    u64::from_str_radix(text.trim(), 16)
        .map_err(|_| errno_err(Errno::EIO, format!("malformed file_size entry {text:?}")))
}

/// Payload length of the last stripe for a file of `size` bytes.
pub fn last_stripe_payload(size: u64, stripe_size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let rem = size % stripe_size;
    if rem == 0 {
        stripe_size
    } else {
        rem
    }
}

/// Textual mtime stamp stored in the base object's xattr.
pub fn mtime_stamp(now: SystemTime) -> String {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:09}", since_epoch.as_secs(), since_epoch.subsec_nanos())
}

/// Build an error whose category is carried as an `Errno` root cause.
pub fn errno_err(errno: Errno, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(errno).context(message.into())
}

/// The error category of `err`, when it carries one.
pub fn errno_of(err: &anyhow::Error) -> Option<Errno> {
    err.root_cause().downcast_ref::<Errno>().copied()
}

pub fn is_errno(err: &anyhow::Error, errno: Errno) -> bool {
    errno_of(err) == Some(errno)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_names_are_deterministic() {
        assert_eq!(stripe_object_name("ino", 0), "ino");
        assert_eq!(stripe_object_name("ino", 1), "ino//0000000000000001");
        assert_eq!(stripe_object_name("ino", 0x2a), "ino//000000000000002a");
    }

    #[test]
    fn hex_encoding_orders_lexicographically() {
        let width = size_hex_width(1 << 40);
        let mut sizes = vec![0_u64, 5, 50, 255, 4096, (1 << 40) - 1];
        let mut encoded: Vec<String> = sizes
            .iter()
            .map(|s| encode_size_hex(*s, width))
            .collect();
        sizes.sort_unstable();
        encoded.sort();
        let decoded: Vec<u64> = encoded
            .iter()
            .map(|e| decode_size_hex(e.as_bytes()).unwrap())
            .collect();
        assert_eq!(decoded, sizes);
    }

    #[test]
    fn empty_value_sorts_below_every_size() {
        let width = size_hex_width(u64::MAX);
        assert!(b"".as_slice() < encode_size_hex(0, width).as_bytes());
    }

    #[test]
    fn stripe_size_alignment() {
        assert_eq!(align_stripe_size(128, 0), 128);
        assert_eq!(align_stripe_size(128, 64), 128);
        assert_eq!(align_stripe_size(100, 64), 128);
    }

    #[test]
    fn last_stripe_payload_handles_exact_multiples() {
        assert_eq!(last_stripe_payload(0, 8), 0);
        assert_eq!(last_stripe_payload(5, 8), 5);
        assert_eq!(last_stripe_payload(8, 8), 8);
        assert_eq!(last_stripe_payload(12, 8), 4);
        assert_eq!(last_stripe_payload(16, 8), 8);
    }

    #[test]
    fn errno_round_trips_through_anyhow() {
        let err = errno_err(Errno::EOVERFLOW, "read past end of file");
        assert!(is_errno(&err, Errno::EOVERFLOW));
        assert_eq!(errno_of(&err), Some(Errno::EOVERFLOW));
        let wrapped = err.context("outer context");
        assert!(is_errno(&wrapped, Errno::EOVERFLOW));
    }
}
