use std::env;
use std::time::Duration;

use crate::gateway::RetryPolicy;
use crate::reference::DEFAULT_REFERENCE_SIZE;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:3000/sdapi/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub api_base: String,
    pub request_timeout: Duration,
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
    pub scene_pause: Duration,
    pub reference_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(600),
            query_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            scene_pause: Duration::from_millis(500),
            reference_size: DEFAULT_REFERENCE_SIZE,
        }
    }
}

impl WorkerConfig {
    /// Reads `STORYBOOK_*` overrides; unparsable values keep the default and
    /// parsed ones are clamped to sane bounds.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: non_empty_env("STORYBOOK_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            request_timeout: env_u64("STORYBOOK_REQUEST_TIMEOUT_SECS")
                .map(|value| Duration::from_secs(value.clamp(5, 3600)))
                .unwrap_or(defaults.request_timeout),
            query_timeout: env_u64("STORYBOOK_QUERY_TIMEOUT_SECS")
                .map(|value| Duration::from_secs(value.clamp(1, 600)))
                .unwrap_or(defaults.query_timeout),
            retry: RetryPolicy {
                max_retries: env_u64("STORYBOOK_MAX_RETRIES")
                    .map(|value| value.min(20) as u32)
                    .unwrap_or(defaults.retry.max_retries),
                backoff: env_u64("STORYBOOK_RETRY_BACKOFF_MS")
                    .map(|value| Duration::from_millis(value.min(10_000)))
                    .unwrap_or(defaults.retry.backoff),
            },
            scene_pause: env_u64("STORYBOOK_SCENE_PAUSE_MS")
                .map(|value| Duration::from_millis(value.min(60_000)))
                .unwrap_or(defaults.scene_pause),
            reference_size: env_u64("STORYBOOK_REFERENCE_SIZE")
                .map(|value| value.clamp(64, 2048) as u32)
                .unwrap_or(defaults.reference_size),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    non_empty_env(key).and_then(|raw| raw.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{WorkerConfig, DEFAULT_API_BASE};

    #[test]
    fn defaults_match_local_webui() {
        let config = WorkerConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.request_timeout, Duration::from_secs(600));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 10);
        assert_eq!(config.scene_pause, Duration::from_millis(500));
        assert_eq!(config.reference_size, 1024);
    }
}
