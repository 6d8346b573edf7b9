use indexmap::IndexMap;
use serde::Serialize;

pub const DEFAULT_LORA_WEIGHT: f64 = 0.8;

/// A learned style adjustment the downstream service can apply when the
/// prompt carries its trigger token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyleSpec {
    pub id: String,
    pub name: String,
    pub lora: String,
    pub description: String,
}

impl StyleSpec {
    pub fn trigger(&self, weight: f64) -> String {
        format!("<lora:{}:{}>", self.lora, trim_weight(weight))
    }
}

#[derive(Debug, Clone)]
pub struct StyleRegistry {
    styles: IndexMap<String, StyleSpec>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self {
            styles: default_styles(),
        }
    }
}

impl StyleRegistry {

    pub fn get(&self, id: &str) -> Option<&StyleSpec> {
        self.styles.get(id.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleSpec> {
        self.styles.values()
    }
}

fn trim_weight(weight: f64) -> String {
    let text = format!("{weight:.2}");
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

fn default_styles() -> IndexMap<String, StyleSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, name: &str, description: &str| {
        map.insert(
            id.to_string(),
            StyleSpec {
                id: id.to_string(),
                name: name.to_string(),
                lora: id.to_string(),
                description: description.to_string(),
            },
        );
    };

    insert(
        "picture_book",
        "Picture Book",
        "clean outlines and flat warm colors",
    );
    insert(
        "soft_anime",
        "Soft Anime",
        "gentle anime shading with pastel palettes",
    );
    insert(
        "whimsical_watercolor",
        "Whimsical Watercolor",
        "loose watercolor washes with paper texture",
    );

    map
}
