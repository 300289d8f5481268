//! Striped file I/O engine over a distributed object store.
//!
//! A file is a linear byte range backed by a sequence of fixed-size
//! objects ("stripes") in a pool; concurrent writers across the cluster
//! coordinate through the store's advisory locks while the
//! authoritative file size lives in a compare-and-set guarded omap
//! entry on the base object.

pub mod config;
pub mod handle;
pub mod inline;
pub mod io;
pub mod lock;
pub mod ops;
pub mod reaper;
pub mod store;
pub mod types;

pub use config::{EngineConfig, LogLevel};
pub use handle::FileHandle;
pub use inline::{InlineBinding, InlineBuffer};
pub use io::{FileIo, FileIoMap};
pub use ops::{AsyncOp, OpManager};
pub use reaper::IdleLockReaper;
pub use store::{MemoryStore, ObjectStore, OmapCompare, OmapCompareOp};
