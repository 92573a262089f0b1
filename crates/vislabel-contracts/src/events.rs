use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Lifecycle of a single task inside a prediction batch.
///
/// Every task walks `Pending -> Preparing -> Invoking` and ends in exactly one
/// of `Succeeded` or `Failed`. A failure may happen in any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Preparing,
    Invoking,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Preparing => "preparing",
            TaskState::Invoking => "invoking",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only JSONL sink for task state transitions of one batch.
///
/// - default fields are `type`, `batch_id`, `ts`
/// - caller payload is merged last
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    batch_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, batch_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                batch_id: batch_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn batch_id(&self) -> &str {
        &self.inner.batch_id
    }

    pub fn task_state(
        &self,
        task_id: &str,
        state: TaskState,
        mut payload: EventPayload,
    ) -> anyhow::Result<Value> {
        payload.insert("task_id".to_string(), Value::String(task_id.to_string()));
        payload.insert("state".to_string(), Value::String(state.to_string()));
        self.emit("task_state", payload)
    }

    pub fn batch_finished(&self, total: usize, succeeded: usize) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("total".to_string(), Value::from(total));
        payload.insert("succeeded".to_string(), Value::from(succeeded));
        payload.insert(
            "failed".to_string(),
            Value::from(total.saturating_sub(succeeded)),
        );
        self.emit("batch_finished", payload)
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "batch_id".to_string(),
            Value::String(self.inner.batch_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

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
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
