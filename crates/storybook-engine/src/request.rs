use serde::{Serialize, Serializer};
use storybook_contracts::formats::{DimensionResolver, FormatInfo};
use storybook_contracts::job::{CoverConfig, GenerationMethod, StoryConfig};
use storybook_contracts::styles::StyleRegistry;
use tracing::{debug, warn};

use crate::context::BatchContext;
use crate::seed::RANDOM_SEED;

const SCENE_QUALIFIERS: &[&str] = &[
    "children's book illustration",
    "storybook art",
    "highly detailed",
    "vibrant colors",
    "soft lighting",
    "consistent character design",
    "professional illustration",
];

const COVER_QUALIFIERS: &[&str] = &[
    "book cover art",
    "centered composition",
    "space for title text",
    "eye-catching",
    "highly detailed",
    "vibrant colors",
    "professional illustration",
];

const NEGATIVE_QUALIFIERS: &[&str] = &[
    "blurry",
    "low quality",
    "deformed",
    "disfigured",
    "bad anatomy",
    "extra limbs",
    "text",
    "watermark",
    "signature",
    "cropped",
    "jpeg artifacts",
];

const HR_SCALE: f64 = 1.5;
const HR_UPSCALER: &str = "R-ESRGAN 4x+";

/// Payload for the txt2img / img2img endpoints. `format_info` rides along for
/// result annotation and is never sent downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler_name: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub batch_size: u32,
    pub n_iter: u32,
    pub restore_faces: bool,
    pub tiling: bool,
    pub do_not_save_samples: bool,
    pub do_not_save_grid: bool,
    pub enable_hr: bool,
    pub hr_scale: f64,
    pub hr_upscaler: String,
    #[serde(
        rename = "init_images",
        serialize_with = "serialize_init_image",
        skip_serializing_if = "Option::is_none"
    )]
    pub init_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoising_strength: Option<f64>,
    #[serde(skip)]
    pub format_info: FormatInfo,
}

fn serialize_init_image<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value
        .as_ref()
        .map(std::slice::from_ref)
        .unwrap_or_default()
        .serialize(serializer)
}

#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    pub resolver: DimensionResolver,
    pub styles: StyleRegistry,
}

impl RequestBuilder {
    /// Scenes always take the seed held by the context. Explicit `width` and
    /// `height` in the config override the resolved scene geometry.
    pub fn build_scene_request(
        &self,
        prompt: &str,
        reference_images: &[String],
        config: &StoryConfig,
        ctx: &mut BatchContext,
    ) -> (GenerationRequest, GenerationMethod) {
        let resolved = ctx.dimensions(&self.resolver, config).clone();
        let width = config.width.unwrap_or(resolved.scene_width);
        let height = config.height.unwrap_or(resolved.scene_height);
        let mut format_info = resolved.scene_info();
        format_info.generation_width = width;
        format_info.generation_height = height;

        let story_id = ctx.story_id.clone();
        let seed = ctx.seeds.get_seed(Some(&story_id), false);
        let prompt = self.expand_prompt(prompt, SCENE_QUALIFIERS, config);
        let request = base_request(prompt, config, width, height, seed, format_info);
        attach_reference(request, reference_images, config, ctx)
    }

    /// Covers use the cover geometry and let the downstream service choose a
    /// seed unless the caller forced one.
    pub fn build_cover_request(
        &self,
        cover: &CoverConfig,
        reference_images: &[String],
        config: &StoryConfig,
        ctx: &mut BatchContext,
    ) -> (GenerationRequest, GenerationMethod) {
        let resolved = ctx.dimensions(&self.resolver, config).clone();
        let seed = config.seed.unwrap_or(RANDOM_SEED);
        let prompt = self.expand_prompt(&cover_subject(cover), COVER_QUALIFIERS, config);
        let request = base_request(
            prompt,
            config,
            resolved.cover_width,
            resolved.cover_height,
            seed,
            resolved.cover_info(),
        );
        attach_reference(request, reference_images, config, ctx)
    }

    fn expand_prompt(&self, subject: &str, qualifiers: &[&str], config: &StoryConfig) -> String {
        let mut prompt = format!("{}, {}", subject.trim(), qualifiers.join(", "));
        if let Some(style_id) = config.story_style.as_deref() {
            match self.styles.get(style_id) {
                Some(style) => {
                    prompt.push(' ');
                    prompt.push_str(&style.trigger(config.lora_weight));
                }
                None => warn!(style = style_id, "unknown story style; no style trigger added"),
            }
        }
        prompt
    }
}

fn cover_subject(cover: &CoverConfig) -> String {
    let mut subject = format!("children's book cover illustration for \"{}\"", cover.title);
    if let Some(subtitle) = cover.subtitle.as_deref() {
        subject.push_str(&format!(", subtitle \"{subtitle}\""));
    }
    if let Some(theme) = cover.theme.as_deref() {
        subject.push_str(&format!(", {theme} theme"));
    }
    subject
}

fn base_request(
    prompt: String,
    config: &StoryConfig,
    width: u32,
    height: u32,
    seed: i64,
    format_info: FormatInfo,
) -> GenerationRequest {
    GenerationRequest {
        prompt,
        negative_prompt: config
            .negative_prompt
            .clone()
            .unwrap_or_else(|| NEGATIVE_QUALIFIERS.join(", ")),
        sampler_name: config.sampler_name.clone(),
        steps: config.steps,
        cfg_scale: config.cfg_scale,
        width,
        height,
        seed,
        batch_size: 1,
        n_iter: 1,
        restore_faces: true,
        tiling: false,
        do_not_save_samples: true,
        do_not_save_grid: true,
        enable_hr: true,
        hr_scale: HR_SCALE,
        hr_upscaler: HR_UPSCALER.to_string(),
        init_image: None,
        denoising_strength: None,
        format_info,
    }
}

/// Only the first reference image steers generation; multi-character
/// composition is not supported.
fn attach_reference(
    mut request: GenerationRequest,
    reference_images: &[String],
    config: &StoryConfig,
    ctx: &mut BatchContext,
) -> (GenerationRequest, GenerationMethod) {
    let Some(first) = reference_images.first() else {
        return (request, GenerationMethod::Txt2img);
    };
    if reference_images.len() > 1 {
        debug!(
            ignored = reference_images.len() - 1,
            "only the first reference image is used"
        );
    }
    match ctx.references.process(first, 0) {
        Some(processed) => {
            request.init_image = Some(processed);
            request.denoising_strength = Some(config.denoising_strength());
            (request, GenerationMethod::Img2img)
        }
        None => (request, GenerationMethod::Txt2img),
    }
}
