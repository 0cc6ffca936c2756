use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::MediaKey;

/// Estimated bytes per pixel for decoded RGBA frames.
pub const BYTES_PER_PIXEL: usize = 4;

/// Opaque decoded payload shared between the cache and the UI.
pub type PayloadHandle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Animation,
    VideoFrame,
}

impl MediaKind {
    /// Best guess from a file extension. GIF and WebP report `Image` here;
    /// decoders promote them to `Animation` once they see more than one frame.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tiff" | "tif" => Some(Self::Image),
            "webm" | "mp4" | "mkv" | "avi" | "mov" => Some(Self::VideoFrame),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether leaving media of this kind needs a release step.
    pub fn needs_teardown(self) -> bool {
        !matches!(self, Self::Image)
    }
}

/// Metadata handed to the UI alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMeta {
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
    /// Decoded size in memory; this is what the cache budgets against.
    pub byte_size: usize,
    pub frame_count: u32,
    pub duration_ms: Option<u32>,
}

impl MediaMeta {
    pub fn new(kind: MediaKind, width: u32, height: u32, byte_size: usize) -> Self {
        Self {
            kind,
            width,
            height,
            byte_size,
            frame_count: 1,
            duration_ms: None,
        }
    }

    /// Metadata for a single RGBA frame of the given dimensions.
    pub fn rgba(kind: MediaKind, width: u32, height: u32) -> Self {
        let byte_size = (width as usize) * (height as usize) * BYTES_PER_PIXEL;
        Self::new(kind, width, height, byte_size)
    }

    pub fn with_frames(mut self, frame_count: u32, duration_ms: Option<u32>) -> Self {
        self.frame_count = frame_count;
        self.duration_ms = duration_ms;
        self
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// What a decoder hands back on success.
#[derive(Clone)]
pub struct DecodedMedia {
    pub meta: MediaMeta,
    pub payload: PayloadHandle,
}

impl DecodedMedia {
    pub fn new<T: Any + Send + Sync>(meta: MediaMeta, payload: T) -> Self {
        Self {
            meta,
            payload: Arc::new(payload),
        }
    }
}

impl fmt::Debug for DecodedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedMedia")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// File fingerprint taken right before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl SourceStamp {
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// A decoded media object as stored in the cache.
#[derive(Clone)]
pub struct MediaEntry {
    pub key: MediaKey,
    pub meta: MediaMeta,
    pub payload: PayloadHandle,
    pub stamp: Option<SourceStamp>,
}

impl MediaEntry {
    pub fn new(key: MediaKey, decoded: DecodedMedia, stamp: Option<SourceStamp>) -> Self {
        Self {
            key,
            meta: decoded.meta,
            payload: decoded.payload,
            stamp,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.meta.byte_size
    }

    pub fn kind(&self) -> MediaKind {
        self.meta.kind
    }

    /// Borrow the payload as a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Whether the file on disk still matches what was decoded.
    pub fn is_fresh(&self) -> bool {
        SourceStamp::read(self.key.as_path()) == self.stamp
    }
}

impl fmt::Debug for MediaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEntry")
            .field("key", &self.key)
            .field("meta", &self.meta)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}
