use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;
use crate::formats::{BookFormatSpec, FormatInfo, PrintDimensions, DEFAULT_FORMAT_ID};
use crate::styles::{StyleSpec, DEFAULT_LORA_WEIGHT};

pub const DEFAULT_STEPS: u32 = 30;
pub const DEFAULT_CFG_SCALE: f64 = 7.5;
pub const DEFAULT_SAMPLER: &str = "Euler a";
pub const DEFAULT_CHARACTER_STRENGTH: f64 = 0.35;

pub const MISSING_PROMPT_ERROR: &str =
    "Either 'scene_prompts' array or single 'prompt' is required";

const MIN_SIDE: u32 = 64;
const MAX_SIDE: u32 = 2048;

/// Raw job input as received from the transport. Every field is optional;
/// [`StoryConfig::from_input`] turns the tuning knobs into a validated config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub action: Option<String>,
    pub generation_type: Option<String>,
    #[serde(default)]
    pub scene_prompts: Vec<String>,
    pub prompt: Option<String>,
    pub scene_prompt: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<String>,
    pub story_style: Option<String>,
    pub story_id: Option<String>,
    pub book_format: Option<String>,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub lora_weight: Option<f64>,
    pub character_strength: Option<f64>,
    pub steps: Option<u32>,
    pub cfg_scale: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub negative_prompt: Option<String>,
    pub sampler_name: Option<String>,
    pub seed: Option<i64>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub theme: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Info,
    Cover,
    Batch(Vec<String>),
    Single(String),
}

impl JobInput {
    /// Picks exactly one mode. A non-empty scene list always selects batch
    /// mode; the single prompt is only consulted when the list is empty.
    pub fn kind(&self) -> Result<JobKind, JobError> {
        match self.action.as_deref().map(str::trim) {
            Some("get_info") => return Ok(JobKind::Info),
            Some("generate_book_cover") => return Ok(JobKind::Cover),
            _ => {}
        }
        if self.generation_type.as_deref().map(str::trim) == Some("book_cover") {
            return Ok(JobKind::Cover);
        }
        if !self.scene_prompts.is_empty() {
            return Ok(JobKind::Batch(self.scene_prompts.clone()));
        }
        non_empty(self.prompt.as_deref())
            .or_else(|| non_empty(self.scene_prompt.as_deref()))
            .map(JobKind::Single)
            .ok_or_else(|| JobError::input(MISSING_PROMPT_ERROR))
    }
}

/// Validated, immutable tuning knobs for one job. Serialized back to the
/// caller as `story_config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryConfig {
    pub story_style: Option<String>,
    pub story_id: Option<String>,
    pub book_format: Option<String>,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler_name: String,
    pub lora_weight: f64,
    pub character_strength: f64,
    pub negative_prompt: Option<String>,
    pub seed: Option<i64>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            story_style: None,
            story_id: None,
            book_format: None,
            custom_width: None,
            custom_height: None,
            width: None,
            height: None,
            steps: DEFAULT_STEPS,
            cfg_scale: DEFAULT_CFG_SCALE,
            sampler_name: DEFAULT_SAMPLER.to_string(),
            lora_weight: DEFAULT_LORA_WEIGHT,
            character_strength: DEFAULT_CHARACTER_STRENGTH,
            negative_prompt: None,
            seed: None,
        }
    }
}

impl StoryConfig {
    pub fn from_input(input: &JobInput) -> Result<Self, JobError> {
        let defaults = Self::default();
        let config = Self {
            story_style: non_empty(input.story_style.as_deref()),
            story_id: non_empty(input.story_id.as_deref()),
            book_format: non_empty(input.book_format.as_deref()),
            custom_width: checked_side("custom_width", input.custom_width)?,
            custom_height: checked_side("custom_height", input.custom_height)?,
            width: checked_side("width", input.width)?,
            height: checked_side("height", input.height)?,
            steps: checked_range("steps", input.steps, 1, 150)?.unwrap_or(defaults.steps),
            cfg_scale: checked_range("cfg_scale", input.cfg_scale, 1.0, 30.0)?
                .unwrap_or(defaults.cfg_scale),
            sampler_name: non_empty(input.sampler_name.as_deref())
                .unwrap_or(defaults.sampler_name),
            lora_weight: checked_range("lora_weight", input.lora_weight, 0.0, 2.0)?
                .unwrap_or(defaults.lora_weight),
            character_strength: checked_range(
                "character_strength",
                input.character_strength,
                0.0,
                1.0,
            )?
            .unwrap_or(defaults.character_strength),
            negative_prompt: non_empty(input.negative_prompt.as_deref()),
            seed: match input.seed {
                Some(seed) if seed < -1 => {
                    return Err(JobError::input(format!(
                        "'seed' must be -1 or a non-negative integer, got {seed}"
                    )))
                }
                other => other,
            },
        };
        Ok(config)
    }

    /// Higher character strength keeps more of the reference image. Both ends
    /// of the denoise range stay open so img2img never copies or ignores it.
    pub fn denoising_strength(&self) -> f64 {
        (1.0 - self.character_strength).clamp(0.05, 0.95)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn checked_side(field: &str, value: Option<u32>) -> Result<Option<u32>, JobError> {
    checked_range(field, value, MIN_SIDE, MAX_SIDE)
}

fn checked_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<Option<T>, JobError>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    match value {
        Some(value) if value < min || value > max => Err(JobError::input(format!(
            "'{field}' must be between {min} and {max}, got {value}"
        ))),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    Txt2img,
    Img2img,
}

impl GenerationMethod {
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Txt2img => "txt2img",
            Self::Img2img => "img2img",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationOutcome {
    Images {
        images: Vec<String>,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Images { .. })
    }

    pub fn images(&self) -> &[String] {
        match self {
            Self::Images { images } => images,
            Self::Failed { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Images { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

impl From<Result<Vec<String>, JobError>> for GenerationOutcome {
    fn from(result: Result<Vec<String>, JobError>) -> Self {
        match result {
            Ok(images) => Self::Images { images },
            Err(err) => Self::Failed {
                error: err.to_string(),
                details: err.details(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneResult {
    pub scene_index: usize,
    pub scene_prompt: String,
    pub generation_method: GenerationMethod,
    pub seed: i64,
    #[serde(flatten)]
    pub outcome: GenerationOutcome,
    pub format_info: FormatInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub story_id: String,
    pub total_scenes: usize,
    pub successful_scenes: usize,
    pub failed_scenes: usize,
    pub scenes: Vec<SceneResult>,
    pub story_config: StoryConfig,
    pub style_seed_used: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverConfig {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub book_format: String,
}

impl CoverConfig {
    /// `book_format` starts as the requested id and is replaced by the id of
    /// the format actually used once the cover geometry is resolved.
    pub fn from_input(input: &JobInput) -> Result<Self, JobError> {
        let title = non_empty(input.title.as_deref())
            .ok_or_else(|| JobError::input("'title' is required for book cover generation"))?;
        Ok(Self {
            title,
            subtitle: non_empty(input.subtitle.as_deref()),
            author: non_empty(input.author.as_deref()),
            style: non_empty(input.story_style.as_deref()),
            theme: non_empty(input.theme.as_deref()),
            book_format: non_empty(input.book_format.as_deref())
                .unwrap_or_else(|| DEFAULT_FORMAT_ID.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverResult {
    pub generation_type: String,
    pub generation_method: GenerationMethod,
    pub seed: i64,
    #[serde(flatten)]
    pub outcome: GenerationOutcome,
    pub cover_config: CoverConfig,
    pub print_dimensions: PrintDimensions,
    pub format_info: FormatInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoResult {
    pub status: String,
    pub api_endpoint: String,
    pub available_styles: Vec<StyleSpec>,
    pub available_formats: Vec<BookFormatSpec>,
    pub available_loras: Vec<Value>,
    pub features: Vec<String>,
}
