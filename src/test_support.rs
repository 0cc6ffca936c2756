//! Helpers shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::decoder::Decoder;
use crate::error::DecodeError;
use crate::loader::Completion;
use crate::models::{DecodedMedia, MediaEntry, MediaKey, MediaKind, MediaMeta};

/// Default decoded size reported by [`GatedDecoder`].
pub(crate) const GATED_ENTRY_BYTES: usize = 10;

/// Build a cache entry of the given size. The payload is the key string.
pub(crate) fn entry(path: &str, size: usize, kind: MediaKind) -> MediaEntry {
    let key = MediaKey::new(path);
    let decoded = DecodedMedia::new(MediaMeta::new(kind, 1, 1, size), key.to_string());
    MediaEntry::new(key, decoded, None)
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub(crate) fn recv_completion(
    rx: &async_channel::Receiver<Completion>,
    timeout: Duration,
) -> Option<Completion> {
    let mut received = None;
    wait_until(timeout, || {
        received = rx.try_recv().ok();
        received.is_some()
    });
    received
}

#[derive(Default)]
struct Gates {
    open: HashSet<MediaKey>,
    open_all: bool,
    failures: HashMap<MediaKey, DecodeError>,
    calls: Vec<MediaKey>,
}

/// Decoder whose calls block until the test opens the gate for that path.
///
/// Kinds follow the extension: `.gif` decodes as an animation, video
/// extensions as a video frame, everything else as an image.
pub(crate) struct GatedDecoder {
    gates: Mutex<Gates>,
    changed: Condvar,
}

impl GatedDecoder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: Mutex::new(Gates::default()),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn open(&self, key: &MediaKey) {
        self.gates.lock().open.insert(key.clone());
        self.changed.notify_all();
    }

    pub(crate) fn open_all(&self) {
        self.gates.lock().open_all = true;
        self.changed.notify_all();
    }

    pub(crate) fn fail(&self, key: &MediaKey, err: DecodeError) {
        self.gates.lock().failures.insert(key.clone(), err);
    }

    pub(crate) fn calls(&self, key: &MediaKey) -> usize {
        self.gates.lock().calls.iter().filter(|k| *k == key).count()
    }

    pub(crate) fn call_order(&self) -> Vec<MediaKey> {
        self.gates.lock().calls.clone()
    }

    /// Wait until a decode for `key` has begun.
    pub(crate) fn wait_started(&self, key: &MediaKey, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gates = self.gates.lock();
        while !gates.calls.contains(key) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.changed.wait_for(&mut gates, deadline - now);
        }
        true
    }
}

impl Decoder for GatedDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedMedia, DecodeError> {
        let key = MediaKey::new(path);
        let mut gates = self.gates.lock();
        gates.calls.push(key.clone());
        self.changed.notify_all();

        while !(gates.open_all || gates.open.contains(&key)) {
            self.changed.wait(&mut gates);
        }

        if let Some(err) = gates.failures.get(&key) {
            return Err(err.clone());
        }

        let kind = match key.extension().as_deref() {
            Some("gif") => MediaKind::Animation,
            Some(ext) => MediaKind::from_extension(ext).unwrap_or(MediaKind::Image),
            None => MediaKind::Image,
        };
        let meta = MediaMeta::new(kind, 1, 1, GATED_ENTRY_BYTES);
        Ok(DecodedMedia::new(meta, key.to_string()))
    }
}
