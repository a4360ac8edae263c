//! Re-encodes fetched images to shrink them before they are stored.
//!
//! JPEG is re-encoded at a fixed quality, with its EXIF orientation applied to
//! the pixels, and PNG is recompressed through the PNG encoder. Other image
//! formats are kept as they are once their header parses. What happens to
//! payloads that are not images is the caller's [`NormalizePolicy`].

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizePolicy {
    /// Non-images are rejected and decode failures are errors.
    Strict,
    /// Anything that cannot be re-encoded is stored unmodified.
    BestEffort,
}

impl NormalizePolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::BestEffort }
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid image format")]
    UnrecognizedFormat,

    #[error("failed to decode {format:?} image: {source}")]
    Decode {
        format: ImageFormat,
        source: image::ImageError,
    },

    #[error("failed to encode {format:?} image: {source}")]
    Encode {
        format: ImageFormat,
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reencoded(ImageFormat),
    /// Recognised image in a format that is not re-encoded.
    Unchanged(ImageFormat),
    /// Not an image, or not decodable; only produced under `BestEffort`.
    Passthrough,
}

#[derive(Debug)]
pub struct Normalized {
    pub data: Vec<u8>,
    pub outcome: Outcome,
}

pub struct ImageNormalizer {
    jpeg_quality: u8,
    policy: NormalizePolicy,
}

impl ImageNormalizer {
    pub fn new(jpeg_quality: u8, policy: NormalizePolicy) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            policy,
        }
    }

    /// Normalizes `data`, taking ownership so unchanged payloads avoid a copy.
    pub fn normalize(&self, data: Vec<u8>) -> Result<Normalized, NormalizeError> {
        let format = match image::guess_format(&data) {
            Ok(format) => format,
            Err(_) => return self.fall_back(data, NormalizeError::UnrecognizedFormat),
        };

        let encoded = match format {
            ImageFormat::Jpeg => decode(&data, format).and_then(|img| {
                self.encode_jpeg(&apply_orientation(img, exif_orientation(&data)))
                    .map_err(|source| NormalizeError::Encode { format, source })
            }),
            ImageFormat::Png => decode(&data, format).and_then(|img| {
                encode_png(&img).map_err(|source| NormalizeError::Encode { format, source })
            }),
            // A magic number alone is not an image: "BM..." text sniffs as BMP
            _ => match read_dimensions(&data, format) {
                Ok(_) => {
                    return Ok(Normalized {
                        data,
                        outcome: Outcome::Unchanged(format),
                    });
                }
                Err(e) => {
                    tracing::debug!("{:?} header did not parse: {}", format, e);
                    return self.fall_back(data, NormalizeError::UnrecognizedFormat);
                }
            },
        };

        match encoded {
            Ok(encoded) => Ok(Normalized {
                data: encoded,
                outcome: Outcome::Reencoded(format),
            }),
            Err(e) => self.fall_back(data, e),
        }
    }

    fn fall_back(&self, data: Vec<u8>, err: NormalizeError) -> Result<Normalized, NormalizeError> {
        match self.policy {
            NormalizePolicy::Strict => Err(err),
            NormalizePolicy::BestEffort => {
                tracing::debug!("Storing payload unmodified: {}", err);
                Ok(Normalized {
                    data,
                    outcome: Outcome::Passthrough,
                })
            }
        }
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
        // JPEG carries no alpha channel
        match img {
            DynamicImage::ImageLuma8(gray) => {
                encoder.encode(gray.as_raw(), gray.width(), gray.height(), ColorType::L8)?
            }
            _ => {
                let rgb = img.to_rgb8();
                encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?
            }
        }
        Ok(out)
    }
}

fn decode(data: &[u8], format: ImageFormat) -> Result<DynamicImage, NormalizeError> {
    image::load_from_memory_with_format(data, format)
        .map_err(|source| NormalizeError::Decode { format, source })
}

/// Only formats whose decoder is compiled in can pass this check.
fn read_dimensions(data: &[u8], format: ImageFormat) -> image::ImageResult<(u32, u32)> {
    image::io::Reader::with_format(Cursor::new(data), format).into_dimensions()
}

/// EXIF orientation (1..=8) of a JPEG, 1 when absent or unreadable.
fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Re-encoding drops the EXIF block, so the rotation is baked into the pixels.
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn encode_png(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(img.as_bytes(), img.width(), img.height(), img.color())?;
    Ok(out)
}
