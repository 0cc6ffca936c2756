//! Error types for the loading core.
//!
//! Decode errors are `Clone` because a single decode may be shared by several
//! tickets attached to the same in-flight job.

use std::io;

use crate::models::MediaKey;

/// Failure reported by a [`Decoder`](crate::decoder::Decoder).
///
/// These reach the UI unchanged as `SessionEvent::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The file does not exist.
    #[error("file not found")]
    NotFound,
    /// The file exists but no decoder understands it.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The file was recognized but its contents are broken.
    #[error("corrupt media: {0}")]
    Corrupt(String),
    /// Reading the file failed.
    #[error("I/O failure: {0}")]
    Io(String),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Scheduler conditions. Never surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The work queue is full; the job was parked in the backlog.
    #[error("worker queue saturated ({queued} queued), job parked in backlog")]
    PoolSaturatedTransient { queued: usize },
}

/// Cache conditions reported by [`CacheStore::put`](crate::cache::CacheStore::put).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A single entry is bigger than the whole budget. It is stored alone.
    #[error("entry {key} ({size} bytes) exceeds cache capacity of {capacity} bytes")]
    EntryTooLargeForCapacity {
        key: MediaKey,
        size: usize,
        capacity: usize,
    },
}
