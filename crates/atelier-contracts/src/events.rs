use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// JSONL file shared by every request of one orchestrator. Clones share the
/// same sink, so lines from concurrent requests never interleave.
#[derive(Debug, Clone)]
pub struct EventTrail {
    sink: Arc<TrailSink>,
}

#[derive(Debug)]
struct TrailSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventTrail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            sink: Arc::new(TrailSink {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.sink.path
    }

    pub fn request(&self, request_id: impl Into<String>) -> RequestEvents {
        RequestEvents {
            sink: Arc::clone(&self.sink),
            request_id: request_id.into(),
        }
    }
}

/// Handle that stamps every record with one request id.
#[derive(Debug, Clone)]
pub struct RequestEvents {
    sink: Arc<TrailSink>,
    request_id: String,
}

impl RequestEvents {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Appends one line. `type`, `request_id` and `ts` are always set by the
    /// trail; same-named payload fields are replaced.
    pub fn record(&self, event_type: &str, fields: EventPayload) -> anyhow::Result<Value> {
        let mut event = fields;
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "request_id".to_string(),
            Value::String(self.request_id.clone()),
        );
        event.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let event = Value::Object(event);

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        self.sink.append(line.as_bytes())?;
        Ok(event)
    }
}

impl TrailSink {
    fn append(&self, line: &[u8]) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("event trail lock poisoned"))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))?;
        file.write_all(line)
            .with_context(|| format!("failed appending to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::thread;

    use serde_json::{json, Value};

    use super::{EventPayload, EventTrail};

    fn fields(value: Value) -> EventPayload {
        match value {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        }
    }

    #[test]
    fn record_stamps_request_id_and_utc_timestamp() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let trail = EventTrail::new(temp.path().join("trail").join("events.jsonl"));
        let events = trail.request("req-7");

        let written = events.record(
            "reference_resolved",
            fields(json!({ "mime_type": "image/png", "request_id": "spoofed", "type": "x" })),
        )?;

        let text = std::fs::read_to_string(trail.path())?;
        assert_eq!(text.lines().count(), 1);
        let stored: Value = serde_json::from_str(text.trim_end())?;
        assert_eq!(stored, written);
        assert_eq!(stored["type"], json!("reference_resolved"));
        assert_eq!(stored["request_id"], json!("req-7"));
        assert_eq!(stored["mime_type"], json!("image/png"));
        let ts = stored["ts"].as_str().unwrap_or_default();
        assert!(ts.ends_with('Z'), "expected UTC timestamp, got {ts}");
        chrono::DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn concurrent_requests_keep_lines_whole() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let trail = EventTrail::new(temp.path().join("events.jsonl"));
        let padding = "x".repeat(2048);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let events = trail.request(format!("req-{worker}"));
                let padding = padding.clone();
                thread::spawn(move || -> anyhow::Result<()> {
                    for seq in 0..250 {
                        events.record(
                            "operation_polled",
                            fields(json!({ "polls": seq, "padding": padding })),
                        )?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        }

        let text = std::fs::read_to_string(trail.path())?;
        let mut per_request: HashMap<String, usize> = HashMap::new();
        for line in text.lines() {
            let event: Value = serde_json::from_str(line)?;
            let id = event["request_id"].as_str().unwrap_or_default().to_string();
            *per_request.entry(id).or_default() += 1;
        }
        assert_eq!(per_request.len(), 8);
        assert!(per_request.values().all(|count| *count == 250));
        Ok(())
    }

    #[test]
    fn unwritable_trail_reports_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory")?;
        let trail = EventTrail::new(blocker.join("events.jsonl"));

        let err = trail
            .request("req-1")
            .record("request_started", EventPayload::new())
            .unwrap_err();
        assert!(err.to_string().contains("blocker"));
        Ok(())
    }
}
