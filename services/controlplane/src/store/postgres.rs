//! Postgres-backed implementation of the registry store.
//!
//! # What this module is
//! Implements the store traits on Postgres (via `sqlx`) as the durable, shared
//! source of truth for users, function and endpoint registrations, sharing
//! groups, endpoint function whitelists, tasks with their results, and the
//! request audit trail.
//!
//! # Key invariants
//! - `users.username` is unique; provisioning is a single
//!   `INSERT .. ON CONFLICT .. RETURNING`, so racing first calls for the same
//!   identity converge on one row.
//! - Registrations are appended on re-registration; "latest" means highest
//!   `id`. Updates rewrite the latest row only; deletes remove every row for
//!   the owner together with the rows that hang off the uuid.
//! - A task row and its result row are written in one transaction.
//!
//! # Security model / threat assumptions
//! - Database URLs may contain credentials; avoid logging them.
//! - All statements are parameterized; no dynamic SQL.
//!
//! # Concurrency model
//! - The store is shared across async tasks; `sqlx::PgPool` manages concurrency.
//! - Pool acquire and connect are bounded so a dead database fails fast.
//!
//! # Operational notes
//! Migrations run at connect time via `sqlx::migrate!("./migrations")` so the
//! services can assume the schema exists.
use super::{
    EndpointStore, FunctionStore, RegistryStore, StoreError, StoreResult, TaskStore, UserStore,
};
use crate::config::PostgresConfig;
use crate::model::{
    Endpoint, EndpointStatus, Function, FunctionStatus, FunctionUpdate, NewUser, RequestLogEntry,
    TaskRecord, User,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// Durable registry store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use fnplane_controlplane::config::PostgresConfig;
/// use fnplane_controlplane::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `users` table.
#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: i64,
    username: String,
    globus_identity: String,
    namespace: String,
}

/// Row shape for the `functions` table.
///
/// DB-facing structs stay separate from the domain model so status parsing
/// happens in one visible place.
#[derive(Debug, Clone, FromRow)]
struct DbFunction {
    user_id: i64,
    function_uuid: String,
    function_name: String,
    description: String,
    status: String,
    function_code: String,
    entry_point: String,
}

/// Row shape for the `sites` table.
#[derive(Debug, Clone, FromRow)]
struct DbSite {
    user_id: i64,
    endpoint_uuid: String,
    endpoint_name: String,
    description: String,
    status: String,
}

/// Row shape for a task joined with its latest result.
#[derive(Debug, Clone, FromRow)]
struct DbTask {
    task_id: String,
    user_id: i64,
    function_id: String,
    endpoint_id: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    status: String,
    result: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRequest {
    user_id: i64,
    endpoint: String,
    input_data: String,
    response_data: String,
    logged_at: DateTime<Utc>,
}

impl PostgresStore {
    /// Connect to Postgres and apply embedded migrations.
    ///
    /// # Errors
    /// - Connection, pool setup, or migration failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let store = Self::connect_without_migrations(pg).await?;
        // Migrations run before any service uses the pool; a failure aborts startup.
        sqlx::migrate!("./migrations").run(&store.pool).await?;
        Ok(store)
    }

    /// Connect without touching the schema. Tests that manage migrations use this.
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        // Avoid logging `pg.url`; it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;
        Ok(Self { pool })
    }

}

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(
            "SELECT id, username, globus_identity, namespace FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_db))
    }

    async fn upsert_user(&self, user: NewUser) -> StoreResult<User> {
        // The no-op update makes RETURNING yield the existing row on conflict,
        // so the winner and the losers of a provisioning race read the same id.
        let row = sqlx::query_as::<_, DbUser>(
            r#"INSERT INTO users (username, globus_identity, namespace) VALUES ($1, $2, $3)
               ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
               RETURNING id, username, globus_identity, namespace"#,
        )
        .bind(&user.username)
        .bind(&user.identity)
        .bind(&user.namespace)
        .fetch_one(&self.pool)
        .await?;
        Ok(user_from_db(row))
    }
}

#[async_trait]
impl FunctionStore for PostgresStore {
    async fn insert_function(&self, function: Function) -> StoreResult<Function> {
        sqlx::query(
            r#"INSERT INTO functions (user_id, function_uuid, function_name, description, status, function_code, entry_point)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(function.owner_id)
        .bind(&function.function_uuid)
        .bind(&function.name)
        .bind(&function.description)
        .bind(function.status.as_str())
        .bind(&function.code)
        .bind(&function.entry_point)
        .execute(&self.pool)
        .await?;
        Ok(function)
    }

    async fn latest_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<Function> {
        let row = sqlx::query_as::<_, DbFunction>(
            r#"SELECT user_id, function_uuid, function_name, description, status, function_code, entry_point
               FROM functions WHERE function_uuid = $1 AND user_id = $2
               ORDER BY id DESC LIMIT 1"#,
        )
        .bind(function_uuid)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(function_uuid.to_string()))?;
        function_from_db(row)
    }

    async fn update_function(
        &self,
        owner_id: i64,
        function_uuid: &str,
        update: FunctionUpdate,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"UPDATE functions
               SET function_name = $3, description = $4, function_code = $5, entry_point = $6
               WHERE id = (SELECT id FROM functions WHERE function_uuid = $1 AND user_id = $2
                           ORDER BY id DESC LIMIT 1)"#,
        )
        .bind(function_uuid)
        .bind(owner_id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.code)
        .bind(&update.entry_point)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(function_uuid.to_string()));
        }
        Ok(())
    }

    async fn delete_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM functions WHERE function_uuid = $1 AND user_id = $2")
            .bind(function_uuid)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(function_uuid.to_string()));
        }
        sqlx::query("DELETE FROM function_auth_groups WHERE function_id = $1")
            .bind(function_uuid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn function_groups(&self, function_uuid: &str) -> StoreResult<Vec<String>> {
        let groups = sqlx::query_scalar::<_, String>(
            "SELECT group_id FROM function_auth_groups WHERE function_id = $1 ORDER BY group_id",
        )
        .bind(function_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn add_function_group(&self, function_uuid: &str, group_id: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO function_auth_groups (function_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(function_uuid)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for PostgresStore {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> StoreResult<Endpoint> {
        sqlx::query(
            r#"INSERT INTO sites (user_id, endpoint_uuid, endpoint_name, description, status)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(endpoint.owner_id)
        .bind(&endpoint.endpoint_uuid)
        .bind(&endpoint.name)
        .bind(&endpoint.description)
        .bind(endpoint.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn latest_endpoint(&self, endpoint_uuid: &str) -> StoreResult<Option<Endpoint>> {
        let row = sqlx::query_as::<_, DbSite>(
            r#"SELECT user_id, endpoint_uuid, endpoint_name, description, status
               FROM sites WHERE endpoint_uuid = $1 ORDER BY id DESC LIMIT 1"#,
        )
        .bind(endpoint_uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(endpoint_from_db).transpose()
    }

    async fn endpoint_owned_by(
        &self,
        owner_id: i64,
        endpoint_uuid: &str,
    ) -> StoreResult<Option<Endpoint>> {
        let row = sqlx::query_as::<_, DbSite>(
            r#"SELECT user_id, endpoint_uuid, endpoint_name, description, status
               FROM sites WHERE endpoint_uuid = $1 AND user_id = $2 ORDER BY id DESC LIMIT 1"#,
        )
        .bind(endpoint_uuid)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(endpoint_from_db).transpose()
    }

    async fn endpoint_groups(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>> {
        let groups = sqlx::query_scalar::<_, String>(
            "SELECT group_id FROM auth_groups WHERE endpoint_id = $1 ORDER BY group_id",
        )
        .bind(endpoint_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn add_endpoint_group(&self, endpoint_uuid: &str, group_id: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO auth_groups (endpoint_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(endpoint_uuid)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_endpoint(&self, owner_id: i64, endpoint_uuid: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM sites WHERE endpoint_uuid = $1 AND user_id = $2")
            .bind(endpoint_uuid)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(endpoint_uuid.to_string()));
        }
        sqlx::query("DELETE FROM auth_groups WHERE endpoint_id = $1")
            .bind(endpoint_uuid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM restricted_endpoint_functions WHERE endpoint_id = $1")
            .bind(endpoint_uuid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn whitelisted_functions(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>> {
        let functions = sqlx::query_scalar::<_, String>(
            r#"SELECT function_id FROM restricted_endpoint_functions
               WHERE endpoint_id = $1 ORDER BY function_id"#,
        )
        .bind(endpoint_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(functions)
    }

    async fn add_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO restricted_endpoint_functions (endpoint_id, function_id)
               VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
        )
        .bind(endpoint_uuid)
        .bind(function_uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM restricted_endpoint_functions WHERE endpoint_id = $1 AND function_id = $2",
        )
        .bind(endpoint_uuid)
        .bind(function_uuid)
        .execute(&self.pool)
        .await?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskStore for PostgresStore {
    async fn insert_task(&self, task: TaskRecord) -> StoreResult<()> {
        // Task and result commit together: a visible task never lacks the
        // result it was submitted with.
        let mut tx = self.pool.begin().await?;
        let insert = sqlx::query(
            r#"INSERT INTO tasks (task_id, user_id, function_id, endpoint_id, created_at, modified_at, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&task.task_id)
        .bind(task.user_id)
        .bind(&task.function_id)
        .bind(&task.endpoint_id)
        .bind(task.created_at)
        .bind(task.modified_at)
        .bind(&task.status)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("task exists".into()));
            }
            return Err(err.into());
        }

        if let Some(result) = &task.result {
            sqlx::query("INSERT INTO results (task_id, result) VALUES ($1, $2)")
                .bind(&task.task_id)
                .bind(result)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        modified_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE tasks SET status = $2, modified_at = $3 WHERE task_id = $1")
            .bind(task_id)
            .bind(status)
            .bind(modified_at)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<TaskRecord> {
        let row = sqlx::query_as::<_, DbTask>(
            r#"SELECT t.task_id, t.user_id, t.function_id, t.endpoint_id, t.created_at, t.modified_at, t.status,
                      (SELECT r.result FROM results r WHERE r.task_id = t.task_id ORDER BY r.id DESC LIMIT 1) AS result
               FROM tasks t WHERE t.task_id = $1"#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        Ok(TaskRecord {
            task_id: row.task_id,
            user_id: row.user_id,
            function_id: row.function_id,
            endpoint_id: row.endpoint_id,
            created_at: row.created_at,
            modified_at: row.modified_at,
            status: row.status,
            result: row.result,
        })
    }

    async fn append_request(&self, entry: RequestLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO requests (user_id, endpoint, input_data, response_data, logged_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(entry.user_id)
        .bind(&entry.endpoint_id)
        .bind(&entry.input)
        .bind(&entry.response)
        .bind(entry.logged_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_requests(&self, user_id: i64) -> StoreResult<Vec<RequestLogEntry>> {
        let rows = sqlx::query_as::<_, DbRequest>(
            r#"SELECT user_id, endpoint, input_data, response_data, logged_at
               FROM requests WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RequestLogEntry {
                user_id: row.user_id,
                endpoint_id: row.endpoint,
                input: row.input_data,
                response: row.response_data,
                logged_at: row.logged_at,
            })
            .collect())
    }
}

#[async_trait]
impl RegistryStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn user_from_db(row: DbUser) -> User {
    User {
        id: row.id,
        username: row.username,
        identity: row.globus_identity,
        namespace: row.namespace,
    }
}

fn function_from_db(row: DbFunction) -> StoreResult<Function> {
    let status = FunctionStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("unknown function status: {}", row.status)))?;
    Ok(Function {
        function_uuid: row.function_uuid,
        owner_id: row.user_id,
        name: row.function_name,
        description: row.description,
        status,
        code: row.function_code,
        entry_point: row.entry_point,
    })
}

fn endpoint_from_db(row: DbSite) -> StoreResult<Endpoint> {
    let status = EndpointStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("unknown endpoint status: {}", row.status)))?;
    Ok(Endpoint {
        endpoint_uuid: row.endpoint_uuid,
        owner_id: row.user_id,
        name: row.endpoint_name,
        description: row.description,
        status,
    })
}
