pub mod batch;
pub mod config;
pub mod context;
pub mod gateway;
pub mod reference;
pub mod request;
pub mod seed;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use storybook_contracts::events::EventWriter;
use storybook_contracts::job::{CoverConfig, InfoResult, JobInput, JobKind, StoryConfig};
use storybook_contracts::JobError;
use tracing::{error, info};

use crate::batch::BatchOrchestrator;
use crate::config::WorkerConfig;
use crate::gateway::{HttpBackend, ImageBackend, InferenceGateway};
use crate::request::RequestBuilder;

const FEATURES: &[&str] = &[
    "story_batch",
    "consistent_style_seed",
    "character_reference_images",
    "book_formats",
    "custom_dimensions",
    "book_cover",
    "style_triggers",
];

/// Handles one job envelope at a time and always answers with a JSON object;
/// failures come back as `{error, details?}`.
pub struct Worker {
    config: WorkerConfig,
    builder: RequestBuilder,
    gateway: InferenceGateway,
    events: Option<EventWriter>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let backend = HttpBackend::new(
            &config.api_base,
            config.request_timeout,
            config.query_timeout,
        )?;
        Ok(Self::with_backend(Box::new(backend), config))
    }

    pub fn with_backend(backend: Box<dyn ImageBackend>, config: WorkerConfig) -> Self {
        Self {
            gateway: InferenceGateway::new(backend, config.retry),
            builder: RequestBuilder::default(),
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn gateway(&self) -> &InferenceGateway {
        &self.gateway
    }

    /// Entry point for the transport: `{"input": {...}}` in, result out.
    pub fn handle_event(&self, event: &Value) -> Value {
        match event.get("input") {
            Some(input) => self.handle_input(input),
            None => error_value(&JobError::input("No input provided")),
        }
    }

    pub fn handle_input(&self, input: &Value) -> Value {
        let outcome = serde_json::from_value::<JobInput>(input.clone())
            .map_err(|err| JobError::input(format!("Invalid input: {err}")))
            .and_then(|input| self.dispatch(&input));
        match outcome {
            Ok(value) => value,
            Err(err) => {
                error!("job failed: {err}");
                error_value(&err)
            }
        }
    }

    pub fn info(&self) -> InfoResult {
        InfoResult {
            status: "ready".to_string(),
            api_endpoint: self.gateway.api_endpoint().to_string(),
            available_styles: self.builder.styles.list().cloned().collect(),
            available_formats: self.builder.resolver.catalog.list().cloned().collect(),
            available_loras: self.gateway.available_loras(),
            features: FEATURES.iter().map(|item| (*item).to_string()).collect(),
        }
    }

    fn dispatch(&self, input: &JobInput) -> Result<Value, JobError> {
        match input.kind()? {
            JobKind::Info => to_value(&self.info()),
            JobKind::Cover => {
                let config = StoryConfig::from_input(input)?;
                let cover = CoverConfig::from_input(input)?;
                info!(title = %cover.title, "book cover job");
                to_value(&self.orchestrator().run_cover(
                    cover,
                    &input.reference_images,
                    &config,
                ))
            }
            JobKind::Batch(scene_prompts) => {
                let config = StoryConfig::from_input(input)?;
                to_value(&self.orchestrator().run_batch(
                    &scene_prompts,
                    &input.reference_images,
                    &config,
                )?)
            }
            JobKind::Single(prompt) => {
                let config = StoryConfig::from_input(input)?;
                to_value(&self.orchestrator().run_single(
                    &prompt,
                    &input.reference_images,
                    &config,
                ))
            }
        }
    }

    fn orchestrator(&self) -> BatchOrchestrator<'_> {
        BatchOrchestrator::new(
            &self.builder,
            &self.gateway,
            self.config.scene_pause,
            self.config.reference_size,
        )
        .with_events(self.events.clone())
    }
}

fn to_value<T: Serialize>(result: &T) -> Result<Value, JobError> {
    serde_json::to_value(result)
        .map_err(|err| JobError::Internal(format!("result serialization failed: {err}")))
}

fn error_value(err: &JobError) -> Value {
    Value::Object(err.to_payload())
}
