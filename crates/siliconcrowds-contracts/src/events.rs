use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub const COMPLETION_REQUESTED: &str = "completion_requested";
pub const VALIDATION_FAILED: &str = "validation_failed";
pub const COMPLETION_FINISHED: &str = "completion_finished";

/// Append-only JSONL log of what a pilot run sent and received.
///
/// - every line carries `type`, `run_id` and `ts`
/// - payload keys are merged last and win over the defaults
/// - non-object payloads are stored under `data`
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        match payload {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("data".to_string(), other);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn emit_writes_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-1");

        let emitted = writer.emit(COMPLETION_REQUESTED, json!({"attempt": 1}))?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], COMPLETION_REQUESTED);
        assert_eq!(parsed["run_id"], "run-1");
        assert_eq!(parsed["attempt"], 1);
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_overrides_defaults_and_scalars_nest_under_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "run-1");

        let emitted = writer.emit(VALIDATION_FAILED, json!({"run_id": "other"}))?;
        assert_eq!(emitted["run_id"], "other");

        let emitted = writer.emit(VALIDATION_FAILED, json!("bad json"))?;
        assert_eq!(emitted["data"], "bad json");
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-1");
        let clone = writer.clone();

        writer.emit(COMPLETION_REQUESTED, Value::Null)?;
        clone.emit(COMPLETION_FINISHED, Value::Null)?;

        let content = fs::read_to_string(&path)?;
        let types = content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect::<Vec<String>>();
        assert_eq!(types, vec![COMPLETION_REQUESTED, COMPLETION_FINISHED]);
        Ok(())
    }
}
