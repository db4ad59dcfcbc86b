//! Persistent store seams for the control-plane services.
//!
//! # Purpose
//! Each service depends on the narrow trait it needs (`UserStore`,
//! `FunctionStore`, `EndpointStore`, `TaskStore`); backends implement all of
//! them plus [`RegistryStore`] so one handle can be shared.
//!
//! # Key invariants
//! - `upsert_user` is an atomic insert-or-fetch keyed by username.
//! - `insert_task` writes the task and its optional result in one unit.
//! - "Latest" lookups return the most recently inserted matching row.
use crate::model::{
    Endpoint, Function, FunctionUpdate, NewUser, RequestLogEntry, TaskRecord, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            other => StoreError::Unexpected(other.into()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>>;
    /// Insert the user, or return the existing row when the username is taken.
    async fn upsert_user(&self, user: NewUser) -> StoreResult<User>;
}

#[async_trait]
pub trait FunctionStore: Send + Sync {
    async fn insert_function(&self, function: Function) -> StoreResult<Function>;
    async fn latest_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<Function>;
    /// Rewrite the newest row for (owner, uuid); `NotFound` when there is none.
    async fn update_function(
        &self,
        owner_id: i64,
        function_uuid: &str,
        update: FunctionUpdate,
    ) -> StoreResult<()>;
    /// Remove every row for (owner, uuid) and its sharing groups.
    async fn delete_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<()>;
    async fn function_groups(&self, function_uuid: &str) -> StoreResult<Vec<String>>;
    async fn add_function_group(&self, function_uuid: &str, group_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> StoreResult<Endpoint>;
    async fn latest_endpoint(&self, endpoint_uuid: &str) -> StoreResult<Option<Endpoint>>;
    async fn endpoint_owned_by(
        &self,
        owner_id: i64,
        endpoint_uuid: &str,
    ) -> StoreResult<Option<Endpoint>>;
    async fn endpoint_groups(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>>;
    async fn add_endpoint_group(&self, endpoint_uuid: &str, group_id: &str) -> StoreResult<()>;
    /// Remove the owner's registration rows plus the endpoint's groups and
    /// function whitelist; `NotFound` when the owner has no such endpoint.
    async fn delete_endpoint(&self, owner_id: i64, endpoint_uuid: &str) -> StoreResult<()>;
    async fn whitelisted_functions(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>>;
    async fn add_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<()>;
    /// Returns whether an entry was removed.
    async fn remove_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert the task row and, when given, its result row atomically.
    async fn insert_task(&self, task: TaskRecord) -> StoreResult<()>;
    async fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        modified_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn get_task(&self, task_id: &str) -> StoreResult<TaskRecord>;
    async fn append_request(&self, entry: RequestLogEntry) -> StoreResult<()>;
    async fn list_requests(&self, user_id: i64) -> StoreResult<Vec<RequestLogEntry>>;
}

#[async_trait]
pub trait RegistryStore: UserStore + FunctionStore + EndpointStore + TaskStore {
    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
