use std::collections::HashSet;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use montage_contracts::settings::QualityTier;
use montage_contracts::{NormalizationError, NormalizedImage, Settings, SourceFormat, SourceImage};
use sha2::{Digest, Sha256};

use crate::cache::NormalizationCache;

pub const OUTPUT_MIME: &str = "image/jpeg";

/// Turns arbitrary raster uploads into size-bounded JPEG base64 payloads.
#[derive(Debug)]
pub struct ImageNormalizer {
    tiers: Vec<QualityTier>,
    max_encoded_bytes: usize,
    max_upload_bytes: usize,
    cache: NormalizationCache,
}

impl ImageNormalizer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tiers: settings.quality_tiers.clone(),
            max_encoded_bytes: settings.max_encoded_bytes,
            max_upload_bytes: settings.max_upload_bytes,
            cache: NormalizationCache::new(settings.cache_ttl()),
        }
    }

    pub fn cache(&self) -> &NormalizationCache {
        &self.cache
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedImage, NormalizationError> {
        self.normalize_cached(raw).map(|(image, _)| image)
    }

    /// Same as [`normalize`](Self::normalize), also reporting whether the
    /// result came from the cache.
    pub fn normalize_cached(
        &self,
        raw: &[u8],
    ) -> Result<(NormalizedImage, bool), NormalizationError> {
        if raw.len() > self.max_upload_bytes {
            return Err(NormalizationError::UploadTooLarge {
                size: raw.len(),
                limit: self.max_upload_bytes,
            });
        }
        self.cache
            .get_or_try_insert_with(raw, || self.normalize_uncached(&sniff(raw)))
    }

    pub fn normalize_uncached(
        &self,
        source: &SourceImage,
    ) -> Result<NormalizedImage, NormalizationError> {
        let decoded = decode(source)?;
        let flattened = flatten_onto_white(&decoded);

        let mut smallest = usize::MAX;
        for tier in &self.tiers {
            let resized = fit_within(&flattened, tier.max_edge);
            let jpeg = encode_jpeg(&resized, tier.quality)?;
            let encoded = BASE64.encode(&jpeg);
            if encoded.len() <= self.max_encoded_bytes {
                log::debug!(
                    "normalized {}x{} {} upload at q{} into {} bytes",
                    resized.width(),
                    resized.height(),
                    source.format.label(),
                    tier.quality,
                    encoded.len()
                );
                return Ok(NormalizedImage {
                    size_bytes: encoded.len(),
                    content_hash: hex::encode(Sha256::digest(&jpeg)),
                    data: encoded,
                    mime_type: OUTPUT_MIME.to_string(),
                    width: resized.width(),
                    height: resized.height(),
                    source_format: source.format,
                });
            }
            smallest = smallest.min(encoded.len());
        }
        Err(NormalizationError::PayloadTooLarge {
            smallest,
            limit: self.max_encoded_bytes,
        })
    }
}

pub fn sniff(raw: &[u8]) -> SourceImage {
    let format = match image::guess_format(raw) {
        Ok(ImageFormat::Png) => SourceFormat::Png,
        Ok(ImageFormat::Jpeg) => SourceFormat::Jpeg,
        Ok(ImageFormat::Gif) => SourceFormat::Gif,
        Ok(ImageFormat::WebP) => SourceFormat::Webp,
        Ok(ImageFormat::Bmp) => SourceFormat::Bmp,
        Ok(ImageFormat::Tiff) => SourceFormat::Tiff,
        _ => SourceFormat::Unknown,
    };
    SourceImage::new(raw.to_vec(), format)
}

/// Keeps the first image of every content hash, preserving order.
pub fn dedupe(images: Vec<NormalizedImage>) -> Vec<NormalizedImage> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| seen.insert(image.content_hash.clone()))
        .collect()
}

fn decode(source: &SourceImage) -> Result<DynamicImage, NormalizationError> {
    let first = match image_format(source.format) {
        Some(format) => image::load_from_memory_with_format(&source.bytes, format),
        None => image::load_from_memory(&source.bytes),
    };
    let first_err = match first {
        Ok(image) => return Ok(image),
        Err(err) => err,
    };
    ImageReader::new(Cursor::new(source.bytes.as_slice()))
        .with_guessed_format()
        .map_err(|err| NormalizationError::UnreadableImage(format!("{first_err}; {err}")))?
        .decode()
        .map_err(|err| NormalizationError::UnreadableImage(format!("{first_err}; {err}")))
}

fn image_format(format: SourceFormat) -> Option<ImageFormat> {
    match format {
        SourceFormat::Png => Some(ImageFormat::Png),
        SourceFormat::Jpeg => Some(ImageFormat::Jpeg),
        SourceFormat::Gif => Some(ImageFormat::Gif),
        SourceFormat::Webp => Some(ImageFormat::WebP),
        SourceFormat::Bmp => Some(ImageFormat::Bmp),
        SourceFormat::Tiff => Some(ImageFormat::Tiff),
        SourceFormat::Unknown => None,
    }
}

/// Composites any alpha channel onto white and drops it.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn fit_within(image: &RgbImage, max_edge: u32) -> RgbImage {
    if image.width().max(image.height()) <= max_edge {
        return image.clone();
    }
    DynamicImage::ImageRgb8(image.clone())
        .resize(max_edge, max_edge, FilterType::Lanczos3)
        .to_rgb8()
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, NormalizationError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(image)
        .map_err(|err| NormalizationError::UnreadableImage(format!("jpeg encode failed: {err}")))?;
    Ok(bytes)
}
