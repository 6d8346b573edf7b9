use serde::{Deserialize, Serialize};
use tracing::warn;

use super::catalog::{BookFormatSpec, FormatCatalog, DEFAULT_FORMAT_ID, PRINT_DPI};

/// Format block attached to every generation result so consumers can rebuild
/// print sizing without re-deriving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,
    pub format_name: String,
    pub generation_width: u32,
    pub generation_height: u32,
    pub aspect_ratio: f64,
    /// Set when the requested format was unknown and the default was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintDimensions {
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: u32,
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDimensions {
    pub scene_width: u32,
    pub scene_height: u32,
    pub cover_width: u32,
    pub cover_height: u32,
    pub format: BookFormatSpec,
    pub fallback_reason: Option<String>,
}

impl ResolvedDimensions {
    pub fn scene_info(&self) -> FormatInfo {
        self.info_for(self.scene_width, self.scene_height)
    }

    pub fn cover_info(&self) -> FormatInfo {
        self.info_for(self.cover_width, self.cover_height)
    }

    fn info_for(&self, width: u32, height: u32) -> FormatInfo {
        FormatInfo {
            format_id: self.format.id.clone(),
            format_name: self.format.name.clone(),
            generation_width: width,
            generation_height: height,
            aspect_ratio: self.format.aspect_ratio,
            fallback_reason: self.fallback_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DimensionResolver {
    pub catalog: FormatCatalog,
}

impl DimensionResolver {
    /// Explicit width and height win over any catalog entry. An unknown id
    /// falls back to the default format and never fails.
    pub fn resolve(
        &self,
        format_id: Option<&str>,
        custom_width: Option<u32>,
        custom_height: Option<u32>,
    ) -> ResolvedDimensions {
        if let (Some(width), Some(height)) = (custom_width, custom_height) {
            return dimensions_from(BookFormatSpec::custom(width, height), None);
        }

        let requested = format_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if let Some(format) = requested.as_deref().and_then(|id| self.catalog.get(id)) {
            return dimensions_from(format.clone(), None);
        }

        let fallback_reason = match requested.as_deref() {
            Some(id) => {
                warn!(requested = id, fallback = DEFAULT_FORMAT_ID, "unknown book format");
                Some(format!(
                    "Unknown book format '{id}'; using '{DEFAULT_FORMAT_ID}'."
                ))
            }
            None => None,
        };
        let format = self
            .catalog
            .get(DEFAULT_FORMAT_ID)
            .or_else(|| self.catalog.list().next())
            .cloned()
            .unwrap_or_else(|| BookFormatSpec::custom(768, 768));
        dimensions_from(format, fallback_reason)
    }
}

fn dimensions_from(format: BookFormatSpec, fallback_reason: Option<String>) -> ResolvedDimensions {
    ResolvedDimensions {
        scene_width: format.scene_width,
        scene_height: format.scene_height,
        cover_width: format.cover_width,
        cover_height: format.cover_height,
        format,
        fallback_reason,
    }
}

/// Final print size at 300 DPI. Generation resolution is a proxy that gets
/// upscaled later, so it plays no part here.
pub fn print_dimensions(format: &BookFormatSpec) -> PrintDimensions {
    let dpi = f64::from(PRINT_DPI);
    PrintDimensions {
        width_in: format.width_in,
        height_in: format.height_in,
        dpi: PRINT_DPI,
        width_px: (format.width_in * dpi).round() as u32,
        height_px: (format.height_in * dpi).round() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::{print_dimensions, DimensionResolver};
    use crate::formats::DEFAULT_FORMAT_ID;

    #[test]
    fn known_format_resolves_catalog_geometry() {
        let resolved = DimensionResolver::default().resolve(Some("portrait_small"), None, None);
        assert_eq!((resolved.scene_width, resolved.scene_height), (512, 768));
        assert_eq!((resolved.cover_width, resolved.cover_height), (704, 1056));
        assert_eq!(resolved.format.id, "portrait_small");
        assert!(resolved.fallback_reason.is_none());

        let resolved = DimensionResolver::default().resolve(Some("square_large"), None, None);
        assert_eq!((resolved.scene_width, resolved.scene_height), (768, 768));
        assert_eq!((resolved.cover_width, resolved.cover_height), (1024, 1024));
    }

    #[test]
    fn unknown_format_falls_back_to_default_with_consistent_ratio() {
        let resolved = DimensionResolver::default().resolve(Some("poster_a0"), None, None);
        assert_eq!(resolved.format.id, DEFAULT_FORMAT_ID);
        let reason = Some("Unknown book format 'poster_a0'; using 'square_small'.");
        assert_eq!(resolved.fallback_reason.as_deref(), reason);
        assert_eq!(resolved.scene_info().fallback_reason.as_deref(), reason);
        assert_eq!(resolved.cover_info().fallback_reason.as_deref(), reason);
        let ratio = f64::from(resolved.scene_width) / f64::from(resolved.scene_height);
        assert!((ratio - resolved.format.aspect_ratio).abs() < 0.01);
    }

    #[test]
    fn missing_format_uses_default_without_fallback_reason() {
        let resolved = DimensionResolver::default().resolve(None, None, None);
        assert_eq!(resolved.format.id, DEFAULT_FORMAT_ID);
        assert!(resolved.fallback_reason.is_none());
    }

    #[test]
    fn custom_dimensions_override_catalog_format() {
        let resolved =
            DimensionResolver::default().resolve(Some("landscape_wide"), Some(640), Some(896));
        assert_eq!((resolved.scene_width, resolved.scene_height), (640, 896));
        assert_eq!((resolved.cover_width, resolved.cover_height), (640, 896));
        let info = resolved.scene_info();
        assert_eq!(info.format_id, "custom");
        assert!((info.aspect_ratio - 640.0 / 896.0).abs() < 1e-9);
    }

    #[test]
    fn single_custom_dimension_is_ignored() {
        let resolved = DimensionResolver::default().resolve(Some("square_large"), Some(640), None);
        assert_eq!(resolved.format.id, "square_large");
        assert_eq!((resolved.scene_width, resolved.scene_height), (768, 768));
    }

    #[test]
    fn print_size_comes_from_physical_inches() {
        let resolver = DimensionResolver::default();
        let resolved = resolver.resolve(Some("portrait_standard"), None, None);
        let print = print_dimensions(&resolved.format);
        assert_eq!((print.width_px, print.height_px), (2550, 3300));
        assert_eq!(print.dpi, 300);
    }
}
