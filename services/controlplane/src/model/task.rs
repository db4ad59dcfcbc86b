//! Task lifecycle records and the request audit trail.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task as reported by the submission path, timestamps in epoch seconds.
///
/// `result` and `reason` are mutually exclusive by convention; when both are
/// present `result` wins.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskSubmission {
    pub task_id: String,
    pub user_id: i64,
    pub function_id: String,
    pub endpoint_id: String,
    pub created_at: f64,
    pub modified_at: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

/// A stored task row plus its linked result text, if one was recorded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub user_id: i64,
    pub function_id: String,
    pub endpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub status: String,
    pub result: Option<String>,
}

/// Append-only audit row; input and response are JSON text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RequestLogEntry {
    pub user_id: i64,
    pub endpoint_id: String,
    pub input: String,
    pub response: String,
    pub logged_at: DateTime<Utc>,
}
