//! Loader configuration.
//!
//! Defaults suit a single-window viewer: a couple of decode workers (only one
//! result is displayed at a time) and a byte budget large enough for a handful
//! of full-resolution frames. Environment variables override the defaults.

/// Default decoded-media budget in megabytes.
pub const DEFAULT_CACHE_MB: usize = 256;

/// Default number of decode workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Maximum number of decode workers.
pub const MAX_WORKERS: usize = 8;

/// Default number of jobs the work channel holds before spilling to the backlog.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub cache_capacity_bytes: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Re-stat files on cache hits and reload entries whose file changed.
    /// The stat runs on the calling thread, so this is off by default.
    pub revalidate_on_hit: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CACHE_MB * 1024 * 1024,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            revalidate_on_hit: false,
        }
    }
}

impl LoaderConfig {
    /// Defaults with `IDXD_CACHE_MB`, `IDXD_LOAD_WORKERS`, `IDXD_LOAD_QUEUE`
    /// and `IDXD_REVALIDATE` applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |name: &str| {
            lookup(name)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
        };

        let mut config = Self::default();
        if let Some(mb) = positive("IDXD_CACHE_MB") {
            config = config.with_cache_mb(mb);
        }
        if let Some(workers) = positive("IDXD_LOAD_WORKERS") {
            config = config.with_workers(workers);
        }
        if let Some(queue) = positive("IDXD_LOAD_QUEUE") {
            config = config.with_queue_capacity(queue);
        }
        if let Some(flag) = lookup("IDXD_REVALIDATE").as_deref().and_then(parse_flag) {
            config.revalidate_on_hit = flag;
        }
        config
    }

    pub fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_capacity_bytes = bytes;
        self
    }

    pub fn with_cache_mb(self, mb: usize) -> Self {
        self.with_cache_bytes(mb.saturating_mul(1024 * 1024))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_revalidate_on_hit(mut self, revalidate: bool) -> Self {
        self.revalidate_on_hit = revalidate;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
