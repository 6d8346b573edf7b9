use indexmap::IndexMap;
use serde::Serialize;

pub const DEFAULT_FORMAT_ID: &str = "square_small";
pub const PRINT_DPI: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookFormatSpec {
    pub id: String,
    pub name: String,
    pub width_in: f64,
    pub height_in: f64,
    pub aspect_ratio: f64,
    pub scene_width: u32,
    pub scene_height: u32,
    pub cover_width: u32,
    pub cover_height: u32,
    pub dpi: u32,
    pub best_for: String,
}

impl BookFormatSpec {
    /// Ad-hoc spec for caller-supplied dimensions. Physical size is derived
    /// from the pixel size at print DPI.
    pub fn custom(width: u32, height: u32) -> Self {
        Self {
            id: "custom".to_string(),
            name: format!("Custom ({width}x{height})"),
            width_in: f64::from(width) / f64::from(PRINT_DPI),
            height_in: f64::from(height) / f64::from(PRINT_DPI),
            aspect_ratio: f64::from(width) / f64::from(height.max(1)),
            scene_width: width,
            scene_height: height,
            cover_width: width,
            cover_height: height,
            dpi: PRINT_DPI,
            best_for: "caller-defined layouts".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormatCatalog {
    formats: IndexMap<String, BookFormatSpec>,
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self {
            formats: default_formats(),
        }
    }
}

impl FormatCatalog {

    pub fn get(&self, id: &str) -> Option<&BookFormatSpec> {
        self.formats.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &BookFormatSpec> {
        self.formats.values()
    }
}

fn default_formats() -> IndexMap<String, BookFormatSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str,
                      name: &str,
                      inches: (f64, f64),
                      scene: (u32, u32),
                      cover: (u32, u32),
                      best_for: &str| {
        map.insert(
            id.to_string(),
            BookFormatSpec {
                id: id.to_string(),
                name: name.to_string(),
                width_in: inches.0,
                height_in: inches.1,
                aspect_ratio: inches.0 / inches.1,
                scene_width: scene.0,
                scene_height: scene.1,
                cover_width: cover.0,
                cover_height: cover.1,
                dpi: PRINT_DPI,
                best_for: best_for.to_string(),
            },
        );
    };

    insert(
        "square_small",
        "Small Square",
        (8.0, 8.0),
        (768, 768),
        (1024, 1024),
        "board books and toddler picture books",
    );
    insert(
        "square_large",
        "Large Square",
        (10.0, 10.0),
        (768, 768),
        (1024, 1024),
        "gift picture books",
    );
    insert(
        "portrait_small",
        "Trade Portrait",
        (6.0, 9.0),
        (512, 768),
        (704, 1056),
        "early readers and chapter books",
    );
    insert(
        "portrait_standard",
        "Letter Portrait",
        (8.5, 11.0),
        (792, 1024),
        (792, 1024),
        "activity and coloring books",
    );
    insert(
        "landscape_standard",
        "Letter Landscape",
        (11.0, 8.5),
        (1024, 792),
        (1024, 792),
        "panoramic picture books",
    );
    insert(
        "landscape_wide",
        "Wide Landscape",
        (10.0, 8.0),
        (960, 768),
        (1280, 1024),
        "bedtime stories with wide spreads",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{BookFormatSpec, FormatCatalog, DEFAULT_FORMAT_ID};

    #[test]
    fn scene_geometry_matches_declared_aspect_ratio() {
        let catalog = FormatCatalog::default();
        for format in catalog.list() {
            let scene_ratio = f64::from(format.scene_width) / f64::from(format.scene_height);
            let cover_ratio = f64::from(format.cover_width) / f64::from(format.cover_height);
            assert!(
                (scene_ratio - format.aspect_ratio).abs() < 0.01,
                "{} scene ratio {scene_ratio} vs {}",
                format.id,
                format.aspect_ratio
            );
            assert!(
                (cover_ratio - format.aspect_ratio).abs() < 0.01,
                "{} cover ratio {cover_ratio} vs {}",
                format.id,
                format.aspect_ratio
            );
        }
    }

    #[test]
    fn generation_sizes_are_multiples_of_eight() {
        for format in FormatCatalog::default().list() {
            for side in [
                format.scene_width,
                format.scene_height,
                format.cover_width,
                format.cover_height,
            ] {
                assert_eq!(side % 8, 0, "{} has side {side}", format.id);
            }
        }
    }

    #[test]
    fn default_format_is_in_catalog() {
        assert!(FormatCatalog::default().get(DEFAULT_FORMAT_ID).is_some());
    }

    #[test]
    fn custom_spec_uses_dimensions_verbatim() {
        let spec = BookFormatSpec::custom(600, 900);
        assert_eq!(spec.id, "custom");
        assert_eq!((spec.scene_width, spec.scene_height), (600, 900));
        assert_eq!((spec.cover_width, spec.cover_height), (600, 900));
        assert!((spec.aspect_ratio - 600.0 / 900.0).abs() < f64::EPSILON);
        assert!((spec.width_in - 2.0).abs() < f64::EPSILON);
        assert!((spec.height_in - 3.0).abs() < f64::EPSILON);
    }
}
