use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use storybook_contracts::job::GenerationMethod;
use storybook_contracts::JobError;
use tracing::{debug, error, info, warn};

use crate::request::GenerationRequest;

const RETRY_STATUSES: &[u16] = &[502, 503, 504];
const MAX_BACKOFF: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum TransportError {
    Timeout,
    Connect,
    Other(String),
}

impl TransportError {
    fn retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect)
    }

    fn into_job_error(self) -> JobError {
        match self {
            Self::Timeout => JobError::Timeout,
            Self::Connect => JobError::Connection,
            Self::Other(message) => JobError::Transport(message),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Raw HTTP seam to the image-generation service. Paths are relative to the
/// API base (`/txt2img`, `/loras`, ...).
pub trait ImageBackend: Send + Sync {
    fn base_url(&self) -> &str;
    fn post_json(&self, path: &str, body: &Value) -> Result<BackendReply, TransportError>;
    fn get_json(&self, path: &str) -> Result<BackendReply, TransportError>;
}

/// Generation posts get the long `timeout`; catalog and readiness GETs are
/// capped by `query_timeout` so `get_info` answers promptly.
pub struct HttpBackend {
    api_base: String,
    http: HttpClient,
    query_timeout: Duration,
}

impl HttpBackend {
    pub fn new(api_base: &str, timeout: Duration, query_timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            http,
            query_timeout: query_timeout.min(timeout),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

impl ImageBackend for HttpBackend {
    fn base_url(&self) -> &str {
        &self.api_base
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<BackendReply, TransportError> {
        let response = self.http.post(self.url(path)).json(body).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(BackendReply { status, body })
    }

    fn get_json(&self, path: &str) -> Result<BackendReply, TransportError> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(self.query_timeout)
            .send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(BackendReply { status, body })
    }
}

/// Bounded retries with exponential backoff: `backoff * 2^(attempt-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

pub struct InferenceGateway {
    backend: Box<dyn ImageBackend>,
    retry: RetryPolicy,
}

impl InferenceGateway {
    pub fn new(backend: Box<dyn ImageBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn api_endpoint(&self) -> &str {
        self.backend.base_url()
    }

    /// Sends one generation request and returns the base64 images. Never
    /// panics or raises past this boundary: every failure is a [`JobError`].
    pub fn call(
        &self,
        request: &GenerationRequest,
        method: GenerationMethod,
    ) -> Result<Vec<String>, JobError> {
        let body = serde_json::to_value(request)
            .map_err(|err| JobError::Internal(format!("request serialization failed: {err}")))?;
        let path = format!("/{}", method.endpoint());
        info!(endpoint = %path, seed = request.seed, "starting inference request");

        let reply = self.post_with_retry(&path, &body)?;
        if reply.status != 200 {
            error!(status = reply.status, "inference request failed");
            return Err(JobError::Downstream {
                status: reply.status,
                body: reply.body,
            });
        }

        let parsed: Value = serde_json::from_str(&reply.body)
            .map_err(|err| JobError::Transport(format!("invalid JSON response: {err}")))?;
        let Some(images) = parsed.get("images").and_then(Value::as_array) else {
            error!("no images in inference response");
            return Err(JobError::MissingImages { raw: parsed });
        };
        let images: Vec<String> = images
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        info!(count = images.len(), "inference completed");
        Ok(images)
    }

    /// Best-effort listing of style models known to the service.
    pub fn available_loras(&self) -> Vec<Value> {
        match self.backend.get_json("/loras") {
            Ok(reply) if reply.status == 200 => serde_json::from_str::<Value>(&reply.body)
                .ok()
                .and_then(|value| value.as_array().cloned())
                .unwrap_or_default(),
            Ok(reply) => {
                warn!(status = reply.status, "failed to list loras");
                Vec::new()
            }
            Err(err) => {
                warn!("failed to list loras: {err:?}");
                Vec::new()
            }
        }
    }

    /// Polls the options endpoint until it answers 200.
    pub fn wait_until_ready(&self, max_attempts: u32, interval: Duration) -> bool {
        for attempt in 1..=max_attempts.max(1) {
            match self.backend.get_json("/options") {
                Ok(reply) if reply.status == 200 => {
                    info!(attempt, "image service is ready");
                    return true;
                }
                Ok(reply) => debug!(attempt, status = reply.status, "image service not ready"),
                Err(TransportError::Timeout) => warn!(attempt, "timeout waiting for image service"),
                Err(err) => {
                    if attempt % 15 == 1 {
                        info!(attempt, max_attempts, "image service not ready yet: {err:?}");
                    }
                }
            }
            thread::sleep(interval);
        }
        error!(max_attempts, "image service failed to become ready");
        false
    }

    fn post_with_retry(&self, path: &str, body: &Value) -> Result<BackendReply, JobError> {
        let mut attempt = 0;
        loop {
            let outcome = self.backend.post_json(path, body);
            let retryable = match &outcome {
                Ok(reply) => RETRY_STATUSES.contains(&reply.status),
                Err(err) => err.retryable(),
            };
            if !retryable || attempt >= self.retry.max_retries {
                return outcome.map_err(TransportError::into_job_error);
            }
            attempt += 1;
            let delay = self.retry.delay(attempt);
            match &outcome {
                Ok(reply) => warn!(attempt, status = reply.status, "transient status; retrying"),
                Err(err) => warn!(attempt, "transient transport failure; retrying: {err:?}"),
            }
            thread::sleep(delay);
        }
    }
}
