use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStarted,
    SessionReset,
    ImageUploaded,
    UnitStarted,
    ApiRequest,
    UnitSucceeded,
    UnitFailed,
    FacesDetected,
    StaleCompletionDropped,
    SessionSaved,
    SessionLoaded,
    SessionDiscarded,
    ArchiveExported,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionReset => "session_reset",
            EventKind::ImageUploaded => "image_uploaded",
            EventKind::UnitStarted => "unit_started",
            EventKind::ApiRequest => "api_request",
            EventKind::UnitSucceeded => "unit_succeeded",
            EventKind::UnitFailed => "unit_failed",
            EventKind::FacesDetected => "faces_detected",
            EventKind::StaleCompletionDropped => "stale_completion_dropped",
            EventKind::SessionSaved => "session_saved",
            EventKind::SessionLoaded => "session_loaded",
            EventKind::SessionDiscarded => "session_discarded",
            EventKind::ArchiveExported => "archive_exported",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only `events.jsonl` for one restoration session.
///
/// Every line carries `type`, `session_id`, `seq` and `ts`; the payload is
/// merged after them and cannot replace them. `seq` follows file order.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

const RESERVED_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, format!("session-{}", Uuid::new_v4().simple()))
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(kind.as_str()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::from(*next_seq));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                event.insert(key, value);
            }
        }

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        *next_seq += 1;

        Ok(Value::Object(event))
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
