//! Media loading and caching for a directory viewer.
//!
//! A [`MediaSession`] turns "show this file" requests into decoded media,
//! serving repeats from a byte-budgeted [`CacheStore`] and sending misses to a
//! [`LoadScheduler`] worker pool. Results for files the user has already
//! navigated away from are never delivered.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod models;
pub mod session;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStats, CacheStore};
pub use config::LoaderConfig;
pub use decoder::{Decoder, ImageFileDecoder};
pub use error::{CacheError, DecodeError, SchedulerError};
pub use loader::{Completion, LoadScheduler, LoadTicket, TicketId, TicketState};
pub use models::{MediaEntry, MediaKey, MediaKind, MediaMeta};
pub use session::{Dispatch, MediaSession, SessionEvent, PREFETCH_GENERATION};
