//! The owner the UI talks to.
//!
//! Every `request_show` bumps a generation counter. Results are delivered
//! only when their ticket's generation is still current, so a late decode for
//! a file the user already navigated away from is dropped on arrival. Cancelling
//! the superseded ticket only frees a worker sooner.
//!
//! The session is not `Sync`: the UI callback runs on the thread that owns the
//! session, from `request_show` (cache hits) or from the `dispatch_*` methods.
//!
//! The requested key and the key on screen are pinned in the cache, so
//! prefetching neighbours never evicts (and tears down) what the user sees.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::cache::CacheStore;
use crate::config::LoaderConfig;
use crate::decoder::Decoder;
use crate::error::DecodeError;
use crate::loader::{Completion, LoadScheduler, LoadTicket, TicketId};
use crate::models::{MediaEntry, MediaKey, MediaKind, MediaMeta, PayloadHandle};

/// Generation stamped on prefetch loads. Navigation generations start at 1.
pub const PREFETCH_GENERATION: u64 = 0;

/// What the UI receives.
#[derive(Clone)]
pub enum SessionEvent {
    /// Replace the display with this media.
    Delivered {
        key: MediaKey,
        meta: MediaMeta,
        payload: PayloadHandle,
        from_cache: bool,
    },
    /// Loading the current file failed; the display is left to the caller.
    Failed { key: MediaKey, error: DecodeError },
}

impl SessionEvent {
    pub fn key(&self) -> &MediaKey {
        match self {
            Self::Delivered { key, .. } | Self::Failed { key, .. } => key,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered {
                key,
                meta,
                from_cache,
                ..
            } => f
                .debug_struct("Delivered")
                .field("key", key)
                .field("meta", meta)
                .field("from_cache", from_cache)
                .finish_non_exhaustive(),
            Self::Failed { key, error } => f
                .debug_struct("Failed")
                .field("key", key)
                .field("error", error)
                .finish(),
        }
    }
}

/// What happened to one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Failed,
    /// Stale generation or prefetch; dropped silently.
    Discarded,
    /// Inconsistent with the session's bookkeeping; logged and dropped.
    Dropped,
}

struct Intent {
    key: MediaKey,
    generation: u64,
    ticket: Option<TicketId>,
}

struct SessionState {
    generation: u64,
    current: Option<Intent>,
    /// Key of the last media handed to the callback.
    shown: Option<MediaKey>,
}

// Clears the flushing flag even if the callback unwinds.
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

type Callback = Box<dyn FnMut(SessionEvent)>;

pub struct MediaSession {
    config: LoaderConfig,
    cache: CacheStore,
    scheduler: LoadScheduler,
    completions: async_channel::Receiver<Completion>,
    state: Mutex<SessionState>,
    callback: RefCell<Callback>,
    /// Events waiting for the callback, with the generation they belong to.
    outbox: RefCell<VecDeque<(u64, SessionEvent)>>,
    flushing: Cell<bool>,
}

impl MediaSession {
    pub fn new<D, F>(config: LoaderConfig, decoder: D, callback: F) -> Self
    where
        D: Decoder,
        F: FnMut(SessionEvent) + 'static,
    {
        Self::with_shared_decoder(config, Arc::new(decoder), callback)
    }

    pub fn with_shared_decoder<F>(
        config: LoaderConfig,
        decoder: Arc<dyn Decoder>,
        callback: F,
    ) -> Self
    where
        F: FnMut(SessionEvent) + 'static,
    {
        let cache = CacheStore::new(config.cache_capacity_bytes);
        let scheduler = LoadScheduler::with_config(&config, cache.clone(), decoder);
        let completions = scheduler.completions();

        debug!(
            workers = config.workers,
            cache_bytes = config.cache_capacity_bytes,
            "Created media session"
        );

        Self {
            config,
            cache,
            scheduler,
            completions,
            state: Mutex::new(SessionState {
                generation: 0,
                current: None,
                shown: None,
            }),
            callback: RefCell::new(Box::new(callback)),
            outbox: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
        }
    }

    /// Show `path`. Cached media is delivered before this returns and `None`
    /// is returned; otherwise a load is scheduled and its ticket returned.
    pub fn request_show(&self, path: impl AsRef<Path>) -> Option<LoadTicket> {
        let key = MediaKey::new(path);

        let (generation, superseded, abandoned) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let previous = state.current.take();
            let abandoned = previous
                .as_ref()
                .map(|intent| intent.key.clone())
                .filter(|k| *k != key && state.shown.as_ref() != Some(k));
            state.current = Some(Intent {
                key: key.clone(),
                generation: state.generation,
                ticket: None,
            });
            (
                state.generation,
                previous.and_then(|intent| intent.ticket),
                abandoned,
            )
        };

        self.cache.pin(&key);
        if let Some(old) = abandoned {
            self.cache.unpin(&old);
        }
        if let Some(ticket) = superseded {
            self.scheduler.cancel(ticket);
        }

        if let Some(entry) = self.cached_entry(&key) {
            debug!(%key, generation, "Cache hit");
            self.emit(generation, SessionEvent::Delivered {
                key,
                meta: entry.meta,
                payload: entry.payload,
                from_cache: true,
            });
            return None;
        }

        let ticket = self.scheduler.submit(key.clone(), generation);
        {
            let mut state = self.state.lock();
            if let Some(intent) = state.current.as_mut() {
                if intent.generation == generation {
                    intent.ticket = Some(ticket.id);
                }
            }
        }
        trace!(%key, generation, ticket = %ticket.id, "Scheduled load");
        Some(ticket)
    }

    /// Tear down the current media: cancel its load if still pending and drop
    /// its cache entry through the kind's release hook. Other entries stay.
    ///
    /// Returns whether a cache entry was released.
    pub fn release_current(&self) -> bool {
        let (released, shown) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (state.current.take(), state.shown.take())
        };

        if let Some(shown) = &shown {
            self.cache.unpin(shown);
        }
        let Some(intent) = released else {
            return false;
        };
        self.cache.unpin(&intent.key);

        if let Some(ticket) = intent.ticket {
            self.scheduler.cancel(ticket);
        }
        let removed = self.cache.remove(&intent.key);
        debug!(key = %intent.key, removed, "Released current media");
        removed
    }

    /// Warm the cache with files the user is likely to open next.
    /// Returns the number of loads scheduled.
    pub fn prefetch<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut scheduled = 0;
        for path in paths {
            let key = MediaKey::new(path);
            if self.cache.contains(&key) || self.scheduler.is_in_flight(&key) {
                continue;
            }
            self.scheduler.submit(key, PREFETCH_GENERATION);
            scheduled += 1;
        }
        if scheduled > 0 {
            trace!(scheduled, "Scheduled prefetch");
        }
        scheduled
    }

    /// Drop the cached entry for `path`, e.g. after the file was renamed.
    pub fn forget(&self, path: impl AsRef<Path>) -> bool {
        self.cache.remove(&MediaKey::new(path))
    }

    pub fn set_release_hook<F>(&self, kind: MediaKind, hook: F)
    where
        F: Fn(&MediaEntry) + Send + Sync + 'static,
    {
        self.cache.set_release_hook(kind, hook);
    }

    /// Handle every completion that has already arrived. Never blocks.
    pub fn dispatch_pending(&self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.handle_completion(completion);
            handled += 1;
        }
        handled
    }

    /// Wait for the next completion and handle it. Returns `None` once the
    /// session is closed.
    pub async fn dispatch_next(&self) -> Option<Dispatch> {
        let completion = self.completions.recv().await.ok()?;
        Some(self.handle_completion(completion))
    }

    /// Handle completions until the session is closed.
    pub async fn run(&self) {
        while self.dispatch_next().await.is_some() {}
    }

    /// Stop the workers and end `run`. Completions not yet handled are lost.
    pub fn close(&self) {
        self.scheduler.shutdown();
        self.completions.close();
    }

    pub fn current_key(&self) -> Option<MediaKey> {
        self.state.lock().current.as_ref().map(|i| i.key.clone())
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn scheduler(&self) -> &LoadScheduler {
        &self.scheduler
    }

    fn cached_entry(&self, key: &MediaKey) -> Option<MediaEntry> {
        let entry = self.cache.get(key)?;
        if self.config.revalidate_on_hit && !entry.is_fresh() {
            debug!(%key, "Cached media changed on disk, reloading");
            self.cache.remove(key);
            return None;
        }
        Some(entry)
    }

    fn handle_completion(&self, completion: Completion) -> Dispatch {
        if completion.generation == PREFETCH_GENERATION {
            trace!(key = %completion.key, "Prefetch finished");
            return Dispatch::Discarded;
        }

        {
            let mut state = self.state.lock();
            if completion.generation != state.generation {
                trace!(
                    key = %completion.key,
                    ticket = %completion.ticket,
                    generation = completion.generation,
                    current = state.generation,
                    "Discarding stale load result"
                );
                return Dispatch::Discarded;
            }

            let current_ticket = state.current.as_mut().and_then(|i| i.ticket.take());
            if current_ticket != Some(completion.ticket) {
                error!(
                    key = %completion.key,
                    ticket = %completion.ticket,
                    generation = completion.generation,
                    "Completion does not match the current ticket"
                );
                if let (Some(intent), Some(ticket)) = (state.current.as_mut(), current_ticket) {
                    intent.ticket = Some(ticket);
                }
                return Dispatch::Dropped;
            }
        }

        match completion.outcome {
            Ok(entry) => {
                debug!(key = %completion.key, ticket = %completion.ticket, "Delivering media");
                self.emit(completion.generation, SessionEvent::Delivered {
                    key: completion.key,
                    meta: entry.meta,
                    payload: entry.payload,
                    from_cache: false,
                });
                Dispatch::Delivered
            }
            Err(error) => {
                debug!(key = %completion.key, %error, "Delivering load failure");
                self.emit(completion.generation, SessionEvent::Failed {
                    key: completion.key,
                    error,
                });
                Dispatch::Failed
            }
        }
    }

    // Events raised while the callback is running are queued and delivered
    // after it returns, so the callback never runs re-entrantly.
    fn emit(&self, generation: u64, event: SessionEvent) {
        self.outbox.borrow_mut().push_back((generation, event));
        if self.flushing.get() {
            return;
        }

        self.flushing.set(true);
        let _guard = FlushGuard(&self.flushing);
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some((generation, event)) = next else {
                break;
            };
            if self.accept(generation, &event) {
                (self.callback.borrow_mut())(event);
            }
        }
    }

    /// Whether a queued event is still current. Updates the on-screen pin
    /// for events that are.
    fn accept(&self, generation: u64, event: &SessionEvent) -> bool {
        let key = event.key();
        let unpin = {
            let mut state = self.state.lock();
            if state.generation != generation {
                trace!(%key, generation, current = state.generation, "Dropping superseded event");
                return false;
            }
            if event.is_delivered() {
                state.shown.replace(key.clone()).filter(|old| old != key)
            } else {
                Some(key.clone()).filter(|k| state.shown.as_ref() != Some(k))
            }
        };

        if let Some(key) = unpin {
            self.cache.unpin(&key);
        }
        true
    }
}
