use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use storybook_contracts::events::{EventPayload, EventWriter};
use storybook_contracts::formats::print_dimensions;
use storybook_contracts::job::{
    BatchResult, CoverConfig, CoverResult, GenerationOutcome, SceneResult, StoryConfig,
};
use storybook_contracts::JobError;
use tracing::{info, warn};

use crate::context::BatchContext;
use crate::gateway::InferenceGateway;
use crate::request::RequestBuilder;

type Sleeper<'a> = Box<dyn Fn(Duration) + 'a>;

/// Sequences scene generations for one job.
///
/// Scenes run strictly one after another; the downstream service owns a
/// single accelerator and must not see concurrent heavy requests. A failed
/// scene is recorded and the batch moves on.
pub struct BatchOrchestrator<'a> {
    builder: &'a RequestBuilder,
    gateway: &'a InferenceGateway,
    scene_pause: Duration,
    reference_size: u32,
    events: Option<EventWriter>,
    sleep: Sleeper<'a>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        builder: &'a RequestBuilder,
        gateway: &'a InferenceGateway,
        scene_pause: Duration,
        reference_size: u32,
    ) -> Self {
        Self {
            builder,
            gateway,
            scene_pause,
            reference_size,
            events: None,
            sleep: Box::new(thread::sleep),
        }
    }

    /// Replaces the inter-scene pause, which otherwise blocks the thread.
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn run_batch(
        &self,
        scene_prompts: &[String],
        reference_images: &[String],
        config: &StoryConfig,
    ) -> Result<BatchResult, JobError> {
        validate_scenes(scene_prompts)?;

        let mut ctx = self.seeded_context(config);
        let seed = ctx.seeds.current().unwrap_or_default();
        info!(
            story_id = %ctx.story_id,
            scenes = scene_prompts.len(),
            seed,
            "starting story batch"
        );
        self.emit(
            &ctx.story_id,
            "batch_started",
            json!({
                "total_scenes": scene_prompts.len(),
                "style_seed": seed,
                "reference_images": reference_images.len(),
            }),
        );

        let mut scenes = Vec::with_capacity(scene_prompts.len());
        for (scene_index, scene_prompt) in scene_prompts.iter().enumerate() {
            if scene_index > 0 && !self.scene_pause.is_zero() {
                (self.sleep)(self.scene_pause);
            }
            let scene =
                self.generate_scene(scene_index, scene_prompt, reference_images, config, &mut ctx);
            self.emit(
                &ctx.story_id,
                "scene_finished",
                json!({
                    "scene_index": scene.scene_index,
                    "generation_method": scene.generation_method,
                    "ok": scene.outcome.is_success(),
                    "error": scene.outcome.error(),
                }),
            );
            scenes.push(scene);
        }

        let successful_scenes = scenes.iter().filter(|scene| scene.outcome.is_success()).count();
        let result = BatchResult {
            story_id: ctx.story_id.clone(),
            total_scenes: scenes.len(),
            successful_scenes,
            failed_scenes: scenes.len() - successful_scenes,
            scenes,
            story_config: config.clone(),
            style_seed_used: seed,
        };
        info!(
            story_id = %result.story_id,
            successful = result.successful_scenes,
            failed = result.failed_scenes,
            cached_references = ctx.references.hits(),
            "story batch finished"
        );
        self.emit(
            &result.story_id,
            "batch_finished",
            json!({
                "successful_scenes": result.successful_scenes,
                "failed_scenes": result.failed_scenes,
                "reference_cache_hits": ctx.references.hits(),
                "reference_cache_misses": ctx.references.misses(),
                "reference_cache_entries": ctx.references.len(),
            }),
        );
        Ok(result)
    }

    /// One scene outside of a batch, seeded the same way a batch would be.
    pub fn run_single(
        &self,
        scene_prompt: &str,
        reference_images: &[String],
        config: &StoryConfig,
    ) -> SceneResult {
        let mut ctx = self.seeded_context(config);
        self.generate_scene(0, scene_prompt, reference_images, config, &mut ctx)
    }

    pub fn run_cover(
        &self,
        mut cover: CoverConfig,
        reference_images: &[String],
        config: &StoryConfig,
    ) -> CoverResult {
        let story_id = resolve_story_id(config);
        let mut ctx = BatchContext::new(story_id, self.reference_size);
        let (request, method) =
            self.builder
                .build_cover_request(&cover, reference_images, config, &mut ctx);
        let format = ctx.dimensions(&self.builder.resolver, config).format.clone();
        cover.book_format = format.id.clone();
        let print = print_dimensions(&format);
        info!(title = %cover.title, method = method.endpoint(), "generating book cover");

        let outcome = GenerationOutcome::from(self.gateway.call(&request, method));
        self.emit(
            &ctx.story_id,
            "cover_finished",
            json!({
                "generation_method": method,
                "ok": outcome.is_success(),
                "error": outcome.error(),
            }),
        );
        CoverResult {
            generation_type: "book_cover".to_string(),
            generation_method: method,
            seed: request.seed,
            outcome,
            cover_config: cover,
            print_dimensions: print,
            format_info: request.format_info,
        }
    }

    fn seeded_context(&self, config: &StoryConfig) -> BatchContext {
        let mut ctx = BatchContext::new(resolve_story_id(config), self.reference_size);
        ctx.reset_seed();
        ctx
    }

    fn generate_scene(
        &self,
        scene_index: usize,
        scene_prompt: &str,
        reference_images: &[String],
        config: &StoryConfig,
        ctx: &mut BatchContext,
    ) -> SceneResult {
        let (request, method) =
            self.builder
                .build_scene_request(scene_prompt, reference_images, config, ctx);
        info!(scene_index, method = method.endpoint(), "generating scene");
        let outcome = GenerationOutcome::from(self.gateway.call(&request, method));
        if let Some(error) = outcome.error() {
            warn!(scene_index, error, "scene generation failed; continuing batch");
        }
        SceneResult {
            scene_index,
            scene_prompt: scene_prompt.to_string(),
            generation_method: method,
            seed: request.seed,
            outcome,
            format_info: request.format_info,
        }
    }

    fn emit(&self, job_id: &str, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = events.for_job(job_id).emit(event_type, payload) {
            warn!(event_type, "failed to write job event: {err:#}");
        }
    }
}

fn validate_scenes(scene_prompts: &[String]) -> Result<(), JobError> {
    if scene_prompts.is_empty() {
        return Err(JobError::input(storybook_contracts::job::MISSING_PROMPT_ERROR));
    }
    if let Some(idx) = scene_prompts.iter().position(|prompt| prompt.trim().is_empty()) {
        return Err(JobError::input(format!("'scene_prompts[{idx}]' is empty")));
    }
    Ok(())
}

fn resolve_story_id(config: &StoryConfig) -> String {
    config.story_id.clone().unwrap_or_else(|| {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        format!("story_{secs}")
    })
}
