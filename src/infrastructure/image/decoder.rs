//! Bounded image decoding and blob codec helpers.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, Write};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, ImageReader};
use jpeg_decoder::PixelFormat;
use tracing::{debug, warn};

use crate::domain::entities::{DecodedImage, SourceDescriptor};
use crate::domain::ports::{CacheError, CacheResult};
use crate::infrastructure::config::EncodedFormat;

trait SourceRead: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> SourceRead for T {}

/// Returns the largest power-of-two sample factor that keeps both half
/// dimensions at or above the target box.
///
/// Sources already within the target on either axis are not downsampled.
#[must_use]
pub fn calculate_downsample(
    native_width: u32,
    native_height: u32,
    target_width: u32,
    target_height: u32,
) -> u32 {
    let target_width = target_width.max(1);
    let target_height = target_height.max(1);
    let mut sample = 1;

    if native_height > target_height || native_width > target_width {
        let half_height = native_height / 2;
        let half_width = native_width / 2;

        while half_height / sample >= target_height && half_width / sample >= target_width {
            sample *= 2;
        }
    }

    sample
}

/// Decodes sources downsampled to fit a target bounding box.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampledDecoder;

impl SampledDecoder {
    /// Creates a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decodes `source` sampled down by [`calculate_downsample`].
    ///
    /// Returns `None` for missing, corrupt or unsupported sources.
    #[must_use]
    pub fn decode_bounded(
        &self,
        source: &SourceDescriptor,
        target_width: u32,
        target_height: u32,
    ) -> Option<DecodedImage> {
        match Self::try_decode_bounded(source, target_width, target_height) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(source = %source, error = %e, "Failed to decode source image");
                None
            }
        }
    }

    /// Reads only the header of `source` and returns its native dimensions.
    ///
    /// # Errors
    /// Returns error if the source cannot be opened or its format is unknown.
    pub fn probe(source: &SourceDescriptor) -> CacheResult<(u32, u32)> {
        Ok(Self::inspect(source)?.1)
    }

    fn inspect(source: &SourceDescriptor) -> CacheResult<(Option<ImageFormat>, (u32, u32))> {
        let reader = ImageReader::new(open_source(source)?).with_guessed_format()?;
        let format = reader.format();
        Ok((format, reader.into_dimensions()?))
    }

    fn try_decode_bounded(
        source: &SourceDescriptor,
        target_width: u32,
        target_height: u32,
    ) -> CacheResult<DecodedImage> {
        let (format, (native_width, native_height)) = Self::inspect(source)?;
        let sample = calculate_downsample(native_width, native_height, target_width, target_height);
        let width = (native_width / sample).max(1);
        let height = (native_height / sample).max(1);

        let scaled = match format {
            Some(ImageFormat::Jpeg) if sample > 1 => {
                match decode_jpeg_scaled(source, width, height) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        debug!(source = %source, error = %e, "Scaled JPEG decode failed");
                        None
                    }
                }
            }
            _ => None,
        };
        let decoded = match scaled {
            Some(image) => image,
            None => ImageReader::new(open_source(source)?)
                .with_guessed_format()?
                .decode()?,
        };

        let pixels = if (decoded.width(), decoded.height()) == (width, height) {
            decoded
        } else {
            decoded.thumbnail_exact(width, height)
        };

        debug!(
            source = %source,
            native_width,
            native_height,
            sample,
            width = pixels.width(),
            height = pixels.height(),
            "Decoded source image"
        );

        Ok(DecodedImage::new(pixels))
    }
}

/// Decodes a JPEG with DCT scaling (1/2, 1/4 or 1/8) so that the result is
/// the smallest reduction still covering `width` x `height`.
///
/// CMYK sources are rejected and take the full decode path.
fn decode_jpeg_scaled(
    source: &SourceDescriptor,
    width: u32,
    height: u32,
) -> CacheResult<DynamicImage> {
    let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
    let mut decoder = jpeg_decoder::Decoder::new(open_source(source)?);
    let (out_width, out_height) = decoder
        .scale(clamp(width), clamp(height))
        .map_err(|e| CacheError::Decode(e.to_string()))?;
    let data = decoder
        .decode()
        .map_err(|e| CacheError::Decode(e.to_string()))?;
    let pixel_format = decoder
        .info()
        .map(|info| info.pixel_format)
        .ok_or_else(|| CacheError::Decode("JPEG header missing after decode".to_string()))?;

    let (w, h) = (u32::from(out_width), u32::from(out_height));
    let image = match pixel_format {
        PixelFormat::L8 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        PixelFormat::RGB24 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        PixelFormat::L16 => {
            let samples = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            ImageBuffer::from_raw(w, h, samples).map(DynamicImage::ImageLuma16)
        }
        PixelFormat::CMYK32 => None,
    };
    image.ok_or_else(|| {
        CacheError::Decode(format!("unsupported scaled JPEG layout {pixel_format:?}"))
    })
}

fn open_source(source: &SourceDescriptor) -> CacheResult<Box<dyn SourceRead>> {
    Ok(match source {
        SourceDescriptor::Path(path) => Box::new(BufReader::new(File::open(path)?)),
        SourceDescriptor::Bytes(bytes) => Box::new(Cursor::new(bytes.clone())),
    })
}

/// Decodes an encoded blob read back from the disk store.
///
/// # Errors
/// Returns error if the blob cannot be read or decoded.
pub fn decode_blob(reader: &mut dyn Read, capacity_hint: usize) -> CacheResult<DecodedImage> {
    let mut blob = Vec::with_capacity(capacity_hint);
    reader.read_to_end(&mut blob)?;
    let pixels = ImageReader::new(Cursor::new(blob))
        .with_guessed_format()?
        .decode()?;
    Ok(DecodedImage::new(pixels))
}

/// Encodes `image` into `writer` with the configured codec.
///
/// # Errors
/// Returns error if the codec rejects the image or the writer fails.
pub fn encode_blob(
    image: &DecodedImage,
    format: EncodedFormat,
    writer: &mut dyn Write,
) -> CacheResult<()> {
    let pixels = image.as_dynamic();
    match format {
        EncodedFormat::Jpeg { quality } => {
            let encoder = JpegEncoder::new_with_quality(writer, quality);
            // JPEG carries no alpha channel.
            let written = if pixels.color().has_alpha() {
                DynamicImage::ImageRgb8(pixels.to_rgb8()).write_with_encoder(encoder)
            } else {
                pixels.write_with_encoder(encoder)
            };
            written.map_err(CacheError::encoding)
        }
        EncodedFormat::Png => pixels
            .write_with_encoder(PngEncoder::new(writer))
            .map_err(CacheError::encoding),
    }
}
