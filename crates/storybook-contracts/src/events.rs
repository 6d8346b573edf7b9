use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only job journal (`events.jsonl`).
///
/// - default fields are `type`, `job_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Writers produced by [`EventWriter::for_job`] share the file lock, so
/// journals for consecutive jobs interleave safely in one file.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    job_id: String,
    lock: Arc<Mutex<()>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            job_id: job_id.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn for_job(&self, job_id: impl Into<String>) -> Self {
        Self {
            path: Arc::clone(&self.path),
            job_id: job_id.into(),
            lock: Arc::clone(&self.lock),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("job_id".to_string(), Value::String(self.job_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "story-abc");

        let mut payload = EventPayload::new();
        payload.insert("total_scenes".to_string(), Value::from(2));
        let emitted = writer.emit("batch_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("batch_started".to_string()));
        assert_eq!(parsed["job_id"], Value::String("story-abc".to_string()));
        assert_eq!(parsed["total_scenes"], Value::from(2));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn job_scoped_writers_share_the_journal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let root = EventWriter::new(&path, "worker");

        root.for_job("story-1").emit("batch_started", EventPayload::new())?;
        root.for_job("story-2").emit("cover_finished", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["job_id"], Value::String("story-1".to_string()));
        assert_eq!(rows[1]["job_id"], Value::String("story-2".to_string()));
        assert_eq!(rows[1]["type"], Value::String("cover_finished".to_string()));
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "story-abc");

        let mut payload = EventPayload::new();
        payload.insert("job_id".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("scene_finished", payload)?;

        assert_eq!(emitted["job_id"], Value::String("override".to_string()));
        Ok(())
    }
}
