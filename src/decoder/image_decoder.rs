use std::io::Cursor;
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, ImageError, ImageFormat, RgbaImage};
use tracing::{debug, trace};

use super::Decoder;
use crate::error::DecodeError;
use crate::models::{DecodedMedia, MediaKind, MediaMeta};

/// One decoded RGBA frame.
pub struct AnimationFrame {
    pub image: RgbaImage,
    pub delay_ms: u32,
}

/// Payload produced by [`ImageFileDecoder`]. Still images have one frame.
pub struct DecodedImage {
    pub frames: Vec<AnimationFrame>,
}

impl DecodedImage {
    pub fn first_frame(&self) -> Option<&RgbaImage> {
        self.frames.first().map(|f| &f.image)
    }
}

/// Decodes still images and GIF/WebP animations into RGBA frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileDecoder;

impl ImageFileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_bytes(path: &Path, bytes: Vec<u8>) -> Result<DecodedMedia, DecodeError> {
        let format = image::guess_format(&bytes)
            .ok()
            .or_else(|| ImageFormat::from_path(path).ok())
            .ok_or_else(|| {
                DecodeError::UnsupportedFormat(format!("unrecognized image data in {:?}", path))
            })?;

        match format {
            ImageFormat::Gif => {
                let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(map_image_error)?;
                decode_animation(decoder)
            }
            ImageFormat::WebP => {
                let decoder = WebPDecoder::new(Cursor::new(bytes)).map_err(map_image_error)?;
                if decoder.has_animation() {
                    decode_animation(decoder)
                } else {
                    let img = DynamicImage::from_decoder(decoder).map_err(map_image_error)?;
                    Ok(still(img))
                }
            }
            fmt => {
                let img =
                    image::load_from_memory_with_format(&bytes, fmt).map_err(map_image_error)?;
                Ok(still(img))
            }
        }
    }
}

impl Decoder for ImageFileDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedMedia, DecodeError> {
        if MediaKind::from_path(path) == Some(MediaKind::VideoFrame) {
            return Err(DecodeError::UnsupportedFormat(format!(
                "video is not handled by the image decoder: {:?}",
                path
            )));
        }

        let bytes = std::fs::read(path)?;
        trace!(?path, len = bytes.len(), "Decoding image");
        let decoded = Self::decode_bytes(path, bytes)?;
        debug!(
            ?path,
            width = decoded.meta.width,
            height = decoded.meta.height,
            frames = decoded.meta.frame_count,
            "Decoded image"
        );
        Ok(decoded)
    }
}

fn still(img: DynamicImage) -> DecodedMedia {
    let rgba = img.into_rgba8();
    let (width, height) = rgba.dimensions();
    let meta = MediaMeta::rgba(MediaKind::Image, width, height);
    DecodedMedia::new(
        meta,
        DecodedImage {
            frames: vec![AnimationFrame {
                image: rgba,
                delay_ms: 0,
            }],
        },
    )
}

fn decode_animation<'a>(decoder: impl AnimationDecoder<'a>) -> Result<DecodedMedia, DecodeError> {
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(map_image_error)?;

    let mut decoded = Vec::with_capacity(frames.len());
    let mut total_ms: u32 = 0;
    for frame in frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_ms = if denom == 0 { 0 } else { numer / denom };
        total_ms = total_ms.saturating_add(delay_ms);
        decoded.push(AnimationFrame {
            image: frame.into_buffer(),
            delay_ms,
        });
    }

    let Some(first) = decoded.first() else {
        return Err(DecodeError::Corrupt("animation has no frames".into()));
    };
    let (width, height) = first.image.dimensions();
    let byte_size = decoded.iter().map(|f| f.image.as_raw().len()).sum();
    let frame_count = decoded.len() as u32;

    let meta = if frame_count > 1 {
        MediaMeta::new(MediaKind::Animation, width, height, byte_size)
            .with_frames(frame_count, Some(total_ms))
    } else {
        MediaMeta::new(MediaKind::Image, width, height, byte_size)
    };

    Ok(DecodedMedia::new(meta, DecodedImage { frames: decoded }))
}

fn map_image_error(err: ImageError) -> DecodeError {
    match err {
        ImageError::IoError(e) => DecodeError::from(e),
        ImageError::Unsupported(e) => DecodeError::UnsupportedFormat(e.to_string()),
        other => DecodeError::Corrupt(other.to_string()),
    }
}
