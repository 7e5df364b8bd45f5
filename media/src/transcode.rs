use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use pixelchat_protocol::InlineImage;
use thiserror::Error;

/// Largest width or height an attachment may have
pub const DEFAULT_MAX_DIMENSION: u32 = 128;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Image could not be decoded: {0}")]
    Undecodable(#[from] image::ImageError),

    #[error("Image has zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },

    #[error("Image could not be encoded as {format:?}: {source}")]
    Encode {
        format: ImageFormat,
        source: image::ImageError,
    },
}

/// Result of a successful transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub image: InlineImage,
    pub width: u32,
    pub height: u32,
}

/// Compute the attachment size for a `width` x `height` source
///
/// The longer side is capped at `max` and the other side scaled to keep the
/// aspect ratio, rounding half up. Images already within bounds are never
/// upscaled. A side that would round down to zero is kept at one pixel.
pub fn bounded_dimensions(width: u32, height: u32, max: u32) -> Result<(u32, u32), TranscodeError> {
    if width == 0 || height == 0 {
        return Err(TranscodeError::ZeroDimension { width, height });
    }

    let max = max.max(1);

    if width > height && width > max {
        Ok((max, scale_side(height, max, width)))
    } else if height > max {
        Ok((scale_side(width, max, height), max))
    } else {
        Ok((width, height))
    }
}

/// round(side * numerator / denominator), half up, at least 1
fn scale_side(side: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (2 * u64::from(side) * u64::from(numerator) + u64::from(denominator))
        / (2 * u64::from(denominator));

    // side <= denominator on both call paths, so this fits in u32
    u32::try_from(scaled).unwrap_or(numerator).max(1)
}

/// Decode, shrink, and re-encode pictures into inline attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTranscoder {
    max_dimension: u32,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImageTranscoder {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Transcode raw image bytes into a bounded inline attachment
    ///
    /// This is CPU bound; async callers should run it on a blocking pool.
    pub fn transcode(&self, bytes: &[u8]) -> Result<Transcoded, TranscodeError> {
        let source_format = image::guess_format(bytes)?;
        let decoded = image::load_from_memory_with_format(bytes, source_format)?;

        let (width, height) =
            bounded_dimensions(decoded.width(), decoded.height(), self.max_dimension)?;

        let surface = decoded.resize_exact(width, height, FilterType::Triangle);
        let (format, encoded) = encode(&surface, output_format(source_format))?;

        tracing::debug!(
            source_width = decoded.width(),
            source_height = decoded.height(),
            width,
            height,
            format = ?format,
            bytes = encoded.len(),
            "Transcoded image"
        );

        Ok(Transcoded {
            image: InlineImage::new(format.to_mime_type(), STANDARD.encode(&encoded)),
            width,
            height,
        })
    }
}

/// Keep the source format where we can write it, PNG otherwise
fn output_format(source: ImageFormat) -> ImageFormat {
    match source {
        ImageFormat::Png
        | ImageFormat::Jpeg
        | ImageFormat::Gif
        | ImageFormat::Bmp
        | ImageFormat::WebP => source,
        _ => ImageFormat::Png,
    }
}

fn encode(surface: &DynamicImage, format: ImageFormat) -> Result<(ImageFormat, Vec<u8>), TranscodeError> {
    match write_image(surface, format) {
        Ok(bytes) => Ok((format, bytes)),
        Err(e) if format != ImageFormat::Png => {
            tracing::warn!(format = ?format, error = %e, "Encoding failed, falling back to PNG");
            let rgba = DynamicImage::ImageRgba8(surface.to_rgba8());
            write_image(&rgba, ImageFormat::Png)
                .map(|bytes| (ImageFormat::Png, bytes))
                .map_err(|source| TranscodeError::Encode {
                    format: ImageFormat::Png,
                    source,
                })
        }
        Err(source) => Err(TranscodeError::Encode { format, source }),
    }
}

fn write_image(surface: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());

    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(surface.to_rgb8()).write_to(&mut out, format)?,
        _ => surface.write_to(&mut out, format)?,
    }

    Ok(out.into_inner())
}
