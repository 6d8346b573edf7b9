use serde_json::{Map, Value};

/// Failure taxonomy surfaced to job callers. Every variant renders to the
/// `{error, details?}` payload shape; nothing escapes the worker as a fault.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Input(String),
    #[error("API request failed with status {status}")]
    Downstream { status: u16, body: String },
    #[error("No images generated")]
    MissingImages { raw: Value },
    #[error("Request timeout")]
    Timeout,
    #[error("Connection error to WebUI API")]
    Connection,
    #[error("Inference failed: {0}")]
    Transport(String),
    #[error("Handler failed: {0}")]
    Internal(String),
}

impl JobError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Downstream { body, .. } => Some(Value::String(body.clone())),
            Self::MissingImages { raw } => Some(raw.clone()),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(self.to_string()));
        if let Some(details) = self.details() {
            payload.insert("details".to_string(), details);
        }
        payload
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::JobError;

    #[test]
    fn downstream_error_carries_status_and_body() {
        let payload = JobError::Downstream {
            status: 503,
            body: "busy".to_string(),
        }
        .to_payload();
        assert_eq!(payload["error"], json!("API request failed with status 503"));
        assert_eq!(payload["details"], json!("busy"));
    }

    #[test]
    fn transport_errors_have_distinct_messages_without_details() {
        let timeout = JobError::Timeout.to_payload();
        let connection = JobError::Connection.to_payload();
        assert_eq!(timeout["error"], json!("Request timeout"));
        assert_eq!(connection["error"], json!("Connection error to WebUI API"));
        assert!(timeout.get("details").is_none());
        assert!(connection.get("details").is_none());
    }

    #[test]
    fn missing_images_echoes_raw_response() {
        let payload = JobError::MissingImages {
            raw: json!({"info": "nothing"}),
        }
        .to_payload();
        assert_eq!(payload["error"], json!("No images generated"));
        assert_eq!(payload["details"]["info"], Value::String("nothing".to_string()));
    }

    #[test]
    fn anyhow_errors_become_internal() {
        let err: JobError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "Handler failed: disk full");
    }
}
