use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Instruction sent to the model when a task carries no `question`.
pub const DEFAULT_PROMPT: &str = "请描述这张图片的内容";

/// Opaque task identifier as sent by the annotation host.
///
/// Hosts send integers today, but any JSON number or string is accepted so
/// the value can be echoed back verbatim into artifact names and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Number(Number),
    Text(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Number(value) => write!(f, "{value}"),
            TaskId::Text(value) => f.write_str(value),
        }
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        TaskId::Number(value.into())
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        TaskId::Number(value.into())
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Fields the backend does not read are kept so a task survives a
    /// read/write cycle unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub data: TaskData,
    /// Set when the row could not be decoded. Such a task is still part of
    /// the batch so it can be answered with a failed prediction.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, image: Option<&str>, question: Option<&str>) -> Self {
        Self {
            id: id.into(),
            data: TaskData {
                image: image.map(str::to_string),
                question: question.map(str::to_string),
                extra: Map::new(),
            },
            malformed: None,
        }
    }

    /// Placeholder for a row that failed to decode. The id is salvaged from
    /// the row when it holds a scalar, otherwise `row-{idx}` is used.
    pub fn malformed(idx: usize, row: &Value, reason: impl Into<String>) -> Self {
        let id = match row.get("id") {
            Some(Value::Number(value)) => TaskId::Number(value.clone()),
            Some(Value::String(value)) => TaskId::Text(value.clone()),
            Some(Value::Bool(value)) => TaskId::Text(value.to_string()),
            _ => TaskId::Text(format!("row-{idx}")),
        };
        Self {
            id,
            data: TaskData::default(),
            malformed: Some(reason.into()),
        }
    }

    pub fn image_reference(&self) -> Option<&str> {
        self.data.image.as_deref()
    }

    pub fn prompt(&self) -> &str {
        self.data.question.as_deref().unwrap_or(DEFAULT_PROMPT)
    }
}

/// Parses a task batch from either a bare JSON array or an object with a
/// `tasks` array, the two shapes annotation hosts post.
///
/// Only the batch framing can fail. A row that does not decode becomes a
/// [`Task::malformed`] placeholder at its position.
pub fn parse_task_batch(raw: &str) -> anyhow::Result<Vec<Task>> {
    let parsed: Value = serde_json::from_str(raw)?;
    parse_task_value(parsed)
}

pub fn parse_task_value(parsed: Value) -> anyhow::Result<Vec<Task>> {
    let rows = match parsed {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(rows)) => rows,
            _ => anyhow::bail!("task batch object has no `tasks` array"),
        },
        _ => anyhow::bail!("task batch must be a JSON array or an object with `tasks`"),
    };
    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| match Task::deserialize(&row) {
            Ok(task) => task,
            Err(err) => Task::malformed(idx, &row, format!("task #{idx} is malformed: {err}")),
        })
        .collect())
}
