//! Decode collaborators.
//!
//! The loading core treats decoding as one opaque, uninterruptible call.
//! Anything implementing [`Decoder`] can be plugged into a session; the
//! bundled [`ImageFileDecoder`] covers still images and GIF/WebP animations.

use std::path::Path;

use crate::error::DecodeError;
use crate::models::DecodedMedia;

pub mod image_decoder;

pub use image_decoder::{AnimationFrame, DecodedImage, ImageFileDecoder};

pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> Result<DecodedMedia, DecodeError>;
}

impl<F> Decoder for F
where
    F: Fn(&Path) -> Result<DecodedMedia, DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, path: &Path) -> Result<DecodedMedia, DecodeError> {
        self(path)
    }
}
