use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const DEFAULT_REFERENCE_SIZE: u32 = 1024;

/// Memoizes processed character reference images for one job.
///
/// Entries are keyed by character slot plus a hash of the payload, so the
/// same bytes in the same slot are decoded and resized exactly once. Payloads
/// that fail to decode are remembered as `None`.
#[derive(Debug, Clone)]
pub struct ReferenceImageCache {
    target_size: u32,
    entries: HashMap<String, Option<String>>,
    hits: u64,
    misses: u64,
}

impl Default for ReferenceImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_SIZE)
    }
}

impl ReferenceImageCache {
    pub fn new(target_size: u32) -> Self {
        Self {
            target_size: target_size.max(1),
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the processed payload, or `None` when the image cannot be
    /// used; callers then fall back to text-to-image.
    pub fn process(&mut self, image_data: &str, character_index: usize) -> Option<String> {
        let payload = strip_data_uri(image_data);
        let key = cache_key(payload, character_index);
        if let Some(cached) = self.entries.get(&key) {
            self.hits += 1;
            debug!(key = %key, usable = cached.is_some(), "reference image cache hit");
            return cached.clone();
        }

        self.misses += 1;
        let processed = match normalize_reference(payload, self.target_size) {
            Ok(processed) => {
                debug!(key = %key, size = self.target_size, "reference image processed");
                Some(processed)
            }
            Err(err) => {
                warn!(character_index, "reference image unusable: {err:#}");
                None
            }
        };
        self.entries.insert(key, processed.clone());
        processed
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of decode/resize attempts, successful or not.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Distinct references seen, usable or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn strip_data_uri(image_data: &str) -> &str {
    let trimmed = image_data.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, payload)) = trimmed.split_once(',') {
            return payload.trim();
        }
    }
    trimmed
}

pub fn cache_key(payload: &str, character_index: usize) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    format!("character_{character_index}_{}", hex::encode(&digest[..16]))
}

fn normalize_reference(payload: &str, target_size: u32) -> Result<String> {
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("reference image base64 decode failed")?;
    let decoded = image::load_from_memory(&bytes).context("reference image decode failed")?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let resized = rgb.resize_exact(target_size, target_size, FilterType::Lanczos3);

    let mut encoded = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .context("reference image PNG encode failed")?;
    Ok(BASE64.encode(encoded))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use base64::Engine as _;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::{cache_key, strip_data_uri, ReferenceImageCache, BASE64};

    pub(crate) fn png_base64(width: u32, height: u32, shade: u8) -> String {
        let mut image = RgbaImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgba([shade, 255 - shade, 40, 200]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap_or_default();
        BASE64.encode(bytes)
    }

    #[test]
    fn data_uri_prefix_is_stripped() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_uri("  AAAA "), "AAAA");
    }

    #[test]
    fn prefix_does_not_change_cache_key() {
        let raw = png_base64(4, 4, 10);
        let prefixed = format!("data:image/png;base64,{raw}");
        assert_eq!(
            cache_key(strip_data_uri(&prefixed), 0),
            cache_key(strip_data_uri(&raw), 0)
        );
        assert_ne!(cache_key(&raw, 0), cache_key(&raw, 1));
        assert!(cache_key(&raw, 3).starts_with("character_3_"));
    }

    #[test]
    fn second_lookup_is_a_cache_hit() -> anyhow::Result<()> {
        let mut cache = ReferenceImageCache::new(32);
        let raw = png_base64(8, 6, 90);

        let first = cache.process(&raw, 0);
        let second = cache.process(&format!("data:image/png;base64,{raw}"), 0);

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn processed_image_is_square_rgb_png() -> anyhow::Result<()> {
        let mut cache = ReferenceImageCache::new(48);
        let processed = cache
            .process(&png_base64(20, 10, 30), 0)
            .ok_or_else(|| anyhow::anyhow!("reference not processed"))?;
        let bytes = BASE64.decode(processed.as_bytes())?;
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (48, 48));
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        Ok(())
    }

    #[test]
    fn same_bytes_in_another_slot_are_processed_again() {
        let mut cache = ReferenceImageCache::new(16);
        let raw = png_base64(4, 4, 5);
        cache.process(&raw, 0);
        cache.process(&raw, 1);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn undecodable_payload_returns_none() {
        let mut cache = ReferenceImageCache::new(16);
        assert!(cache.is_empty());
        assert_eq!(cache.process("not-base64!!", 0), None);
        assert_eq!(cache.process(&BASE64.encode(b"not an image"), 0), None);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn failed_decode_is_remembered() {
        let mut cache = ReferenceImageCache::new(16);
        let broken = BASE64.encode(b"not an image");
        assert_eq!(cache.process(&broken, 0), None);
        assert_eq!(cache.process(&format!("data:image/png;base64,{broken}"), 0), None);
        assert_eq!(cache.process(&broken, 0), None);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }
}
