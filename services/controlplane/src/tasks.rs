//! Task bookkeeping and the request audit trail.
//!
//! # Purpose
//! Records submitted tasks (with their result or failure reason) and appends
//! request/response pairs to the audit log.
//!
//! # Key invariants
//! - [`TaskTracker::record`] and [`TaskTracker::log_request`] never fail the
//!   caller. Errors are logged and counted under
//!   `fnplane_bookkeeping_failures_total`; the `try_` variants return them.
//! - A task and its result row are written in one store call, so a stored
//!   task never lacks a result that was supplied.
use crate::config::TimeoutConfig;
use crate::deadline::bounded;
use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::model::{RequestLogEntry, TaskRecord, TaskSubmission};
use crate::store::TaskStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub struct TaskTracker {
    tasks: Arc<dyn TaskStore>,
    timeouts: TimeoutConfig,
}

impl TaskTracker {
    pub fn new(tasks: Arc<dyn TaskStore>, timeouts: TimeoutConfig) -> Self {
        Self { tasks, timeouts }
    }

    /// Best-effort variant of [`try_record`](Self::try_record).
    pub async fn record(&self, task: TaskSubmission) {
        let task_id = task.task_id.clone();
        if let Err(err) = self.try_record(task).await {
            bookkeeping_failed("task", &err);
            tracing::error!(task_id = %task_id, error = %err, "failed to record task");
        }
    }

    pub async fn try_record(&self, task: TaskSubmission) -> ControlPlaneResult<()> {
        let record = TaskRecord {
            created_at: epoch_to_utc(task.created_at)?,
            modified_at: epoch_to_utc(task.modified_at)?,
            result: result_text(task.result, task.reason),
            task_id: task.task_id,
            user_id: task.user_id,
            function_id: task.function_id,
            endpoint_id: task.endpoint_id,
            status: task.status,
        };
        bounded(
            self.timeouts.store,
            "task insert",
            self.tasks.insert_task(record),
        )
        .await
    }

    pub async fn update_status(
        &self,
        task_id: &str,
        status: &str,
        modified_at: f64,
    ) -> ControlPlaneResult<()> {
        let modified_at = epoch_to_utc(modified_at)?;
        bounded(
            self.timeouts.store,
            "task status update",
            self.tasks.update_task_status(task_id, status, modified_at),
        )
        .await
        .map_err(|err| err.for_entity("task"))
    }

    pub async fn get(&self, task_id: &str) -> ControlPlaneResult<TaskRecord> {
        bounded(
            self.timeouts.store,
            "task lookup",
            self.tasks.get_task(task_id),
        )
        .await
        .map_err(|err| err.for_entity("task"))
    }

    /// Best-effort variant of [`try_log_request`](Self::try_log_request).
    pub async fn log_request<I, R>(
        &self,
        user_id: i64,
        endpoint_id: &str,
        input: &I,
        response: &R,
    ) where
        I: Serialize + ?Sized,
        R: Serialize + ?Sized,
    {
        if let Err(err) = self
            .try_log_request(user_id, endpoint_id, input, response)
            .await
        {
            bookkeeping_failed("request_log", &err);
            tracing::error!(user_id, endpoint_id, error = %err, "failed to log request");
        }
    }

    pub async fn try_log_request<I, R>(
        &self,
        user_id: i64,
        endpoint_id: &str,
        input: &I,
        response: &R,
    ) -> ControlPlaneResult<()>
    where
        I: Serialize + ?Sized,
        R: Serialize + ?Sized,
    {
        let entry = RequestLogEntry {
            user_id,
            endpoint_id: endpoint_id.to_string(),
            input: to_json_text(input)?,
            response: to_json_text(response)?,
            logged_at: Utc::now(),
        };
        bounded(
            self.timeouts.store,
            "request log append",
            self.tasks.append_request(entry),
        )
        .await
    }

    /// Audit entries for `user_id`, oldest first.
    pub async fn requests_for(&self, user_id: i64) -> ControlPlaneResult<Vec<RequestLogEntry>> {
        bounded(
            self.timeouts.store,
            "request log lookup",
            self.tasks.list_requests(user_id),
        )
        .await
    }
}

fn bookkeeping_failed(kind: &'static str, err: &ControlPlaneError) {
    let cause = match err {
        ControlPlaneError::Timeout { .. } => "timeout",
        ControlPlaneError::InvalidInput(_) => "invalid_input",
        _ => "store",
    };
    metrics::counter!("fnplane_bookkeeping_failures_total", "kind" => kind, "cause" => cause)
        .increment(1);
}

/// Convert fractional epoch seconds to UTC, keeping sub-second precision.
fn epoch_to_utc(seconds: f64) -> ControlPlaneResult<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(ControlPlaneError::InvalidInput(format!(
            "timestamp {seconds} is not finite"
        )));
    }
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos).ok_or_else(|| {
        ControlPlaneError::InvalidInput(format!("timestamp {seconds} out of range"))
    })
}

/// `result` wins over `reason`; strings are kept raw, other values as JSON.
/// Only `null` counts as absent. Falsy values such as `0`, `false` or `""`
/// are real results and are stored.
fn result_text(result: Option<Value>, reason: Option<Value>) -> Option<String> {
    let payload = result
        .filter(|v| !v.is_null())
        .or_else(|| reason.filter(|v| !v.is_null()))?;
    Some(match payload {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

fn to_json_text<T: Serialize + ?Sized>(value: &T) -> ControlPlaneResult<String> {
    serde_json::to_string(value)
        .map_err(|err| ControlPlaneError::InvalidInput(format!("payload not serializable: {err}")))
}
