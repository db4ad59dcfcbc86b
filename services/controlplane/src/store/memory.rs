//! In-memory implementation of the registry store.
//!
//! # Purpose
//! Implements every store trait with tables held in memory behind
//! `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: mutations take the write lock of the
//!   table they touch, so insert-or-fetch and task+result writes are atomic
//!   within one process.
//! - Multiple controlplane instances each have independent state.
//!
//! # Ordering
//! Functions and endpoints are append-only vectors; insertion order stands in
//! for the auto-increment id a relational backend would use, so "latest" is
//! the last matching element.
use super::{
    EndpointStore, FunctionStore, RegistryStore, StoreError, StoreResult, TaskStore, UserStore,
};
use crate::model::{
    Endpoint, Function, FunctionUpdate, NewUser, RequestLogEntry, TaskRecord, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Users keyed by username, with the id sequence kept under the same lock.
#[derive(Debug, Default)]
struct UserTable {
    next_id: i64,
    by_username: HashMap<String, User>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    users: Arc<RwLock<UserTable>>,
    functions: Arc<RwLock<Vec<Function>>>,
    endpoints: Arc<RwLock<Vec<Endpoint>>>,
    /// Access groups per endpoint uuid.
    auth_groups: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    /// Sharing groups per function uuid.
    function_groups: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    /// Function whitelist per endpoint uuid; empty means unrestricted.
    whitelists: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    /// Task rows keyed by task id; the result travels inside the record.
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
    requests: Arc<RwLock<Vec<RequestLogEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored user rows; used to check provisioning races.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.by_username.len()
    }

    /// Number of stored endpoint registration rows.
    pub async fn endpoint_row_count(&self) -> usize {
        self.endpoints.read().await.len()
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.by_username.get(username).cloned())
    }

    async fn upsert_user(&self, user: NewUser) -> StoreResult<User> {
        // Check and insert under one write lock so racing first calls converge.
        let mut users = self.users.write().await;
        if let Some(existing) = users.by_username.get(&user.username) {
            return Ok(existing.clone());
        }
        users.next_id += 1;
        let stored = User {
            id: users.next_id,
            username: user.username,
            identity: user.identity,
            namespace: user.namespace,
        };
        users
            .by_username
            .insert(stored.username.clone(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl FunctionStore for InMemoryStore {
    async fn insert_function(&self, function: Function) -> StoreResult<Function> {
        self.functions.write().await.push(function.clone());
        Ok(function)
    }

    async fn latest_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<Function> {
        self.functions
            .read()
            .await
            .iter()
            .rev()
            .find(|f| f.owner_id == owner_id && f.function_uuid == function_uuid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(function_uuid.to_string()))
    }

    async fn update_function(
        &self,
        owner_id: i64,
        function_uuid: &str,
        update: FunctionUpdate,
    ) -> StoreResult<()> {
        let mut functions = self.functions.write().await;
        let row = functions
            .iter_mut()
            .rev()
            .find(|f| f.owner_id == owner_id && f.function_uuid == function_uuid)
            .ok_or_else(|| StoreError::NotFound(function_uuid.to_string()))?;
        row.name = update.name;
        row.description = update.description;
        row.code = update.code;
        row.entry_point = update.entry_point;
        Ok(())
    }

    async fn delete_function(&self, owner_id: i64, function_uuid: &str) -> StoreResult<()> {
        let mut functions = self.functions.write().await;
        let before = functions.len();
        functions.retain(|f| !(f.owner_id == owner_id && f.function_uuid == function_uuid));
        if functions.len() == before {
            return Err(StoreError::NotFound(function_uuid.to_string()));
        }
        drop(functions);
        self.function_groups.write().await.remove(function_uuid);
        Ok(())
    }

    async fn function_groups(&self, function_uuid: &str) -> StoreResult<Vec<String>> {
        Ok(members(&*self.function_groups.read().await, function_uuid))
    }

    async fn add_function_group(&self, function_uuid: &str, group_id: &str) -> StoreResult<()> {
        self.function_groups
            .write()
            .await
            .entry(function_uuid.to_string())
            .or_default()
            .insert(group_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for InMemoryStore {
    async fn insert_endpoint(&self, endpoint: Endpoint) -> StoreResult<Endpoint> {
        self.endpoints.write().await.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn latest_endpoint(&self, endpoint_uuid: &str) -> StoreResult<Option<Endpoint>> {
        Ok(self
            .endpoints
            .read()
            .await
            .iter()
            .rev()
            .find(|e| e.endpoint_uuid == endpoint_uuid)
            .cloned())
    }

    async fn endpoint_owned_by(
        &self,
        owner_id: i64,
        endpoint_uuid: &str,
    ) -> StoreResult<Option<Endpoint>> {
        Ok(self
            .endpoints
            .read()
            .await
            .iter()
            .rev()
            .find(|e| e.owner_id == owner_id && e.endpoint_uuid == endpoint_uuid)
            .cloned())
    }

    async fn endpoint_groups(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>> {
        Ok(members(&*self.auth_groups.read().await, endpoint_uuid))
    }

    async fn add_endpoint_group(&self, endpoint_uuid: &str, group_id: &str) -> StoreResult<()> {
        self.auth_groups
            .write()
            .await
            .entry(endpoint_uuid.to_string())
            .or_default()
            .insert(group_id.to_string());
        Ok(())
    }

    async fn delete_endpoint(&self, owner_id: i64, endpoint_uuid: &str) -> StoreResult<()> {
        let mut endpoints = self.endpoints.write().await;
        let before = endpoints.len();
        endpoints.retain(|e| !(e.owner_id == owner_id && e.endpoint_uuid == endpoint_uuid));
        if endpoints.len() == before {
            return Err(StoreError::NotFound(endpoint_uuid.to_string()));
        }
        drop(endpoints);
        self.auth_groups.write().await.remove(endpoint_uuid);
        self.whitelists.write().await.remove(endpoint_uuid);
        Ok(())
    }

    async fn whitelisted_functions(&self, endpoint_uuid: &str) -> StoreResult<Vec<String>> {
        Ok(members(&*self.whitelists.read().await, endpoint_uuid))
    }

    async fn add_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<()> {
        self.whitelists
            .write()
            .await
            .entry(endpoint_uuid.to_string())
            .or_default()
            .insert(function_uuid.to_string());
        Ok(())
    }

    async fn remove_whitelisted_function(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> StoreResult<bool> {
        let mut whitelists = self.whitelists.write().await;
        let Some(functions) = whitelists.get_mut(endpoint_uuid) else {
            return Ok(false);
        };
        let removed = functions.remove(function_uuid);
        if functions.is_empty() {
            whitelists.remove(endpoint_uuid);
        }
        Ok(removed)
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: TaskRecord) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::Conflict("task exists".into()));
        }
        tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        modified_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        task.status = status.to_string();
        task.modified_at = modified_at;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    async fn append_request(&self, entry: RequestLogEntry) -> StoreResult<()> {
        self.requests.write().await.push(entry);
        Ok(())
    }

    async fn list_requests(&self, user_id: i64) -> StoreResult<Vec<RequestLogEntry>> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }
}

fn members(table: &HashMap<String, BTreeSet<String>>, key: &str) -> Vec<String> {
    table
        .get(key)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EndpointStatus, FunctionStatus};

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            identity: name.to_string(),
            namespace: "ns".to_string(),
        }
    }

    fn function(owner_id: i64, uuid: &str, code: &str) -> Function {
        Function {
            function_uuid: uuid.to_string(),
            owner_id,
            name: "hello".to_string(),
            description: String::new(),
            status: FunctionStatus::Registered,
            code: code.to_string(),
            entry_point: "hello".to_string(),
        }
    }

    fn task(task_id: &str, result: Option<&str>) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            task_id: task_id.to_string(),
            user_id: 1,
            function_id: "fn".to_string(),
            endpoint_id: "ep".to_string(),
            created_at: now,
            modified_at: now,
            status: "waiting-for-ep".to_string(),
            result: result.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn upsert_returns_existing_row_for_known_username() {
        let store = InMemoryStore::new();
        let first = store.upsert_user(new_user("a@x.org")).await.expect("user");
        let second = store.upsert_user(new_user("a@x.org")).await.expect("user");
        let other = store.upsert_user(new_user("b@x.org")).await.expect("user");
        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(store.user_count().await, 2);
    }

    #[tokio::test]
    async fn latest_function_prefers_newest_row_for_owner() {
        let store = InMemoryStore::new();
        store
            .insert_function(function(1, "f1", "old"))
            .await
            .expect("insert");
        store
            .insert_function(function(1, "f1", "new"))
            .await
            .expect("insert");
        store
            .insert_function(function(2, "f1", "foreign"))
            .await
            .expect("insert");

        let latest = store.latest_function(1, "f1").await.expect("function");
        assert_eq!(latest.code, "new");
        let err = store.latest_function(3, "f1").await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn endpoint_groups_are_deduplicated() {
        let store = InMemoryStore::new();
        store.add_endpoint_group("ep", "g1").await.expect("group");
        store.add_endpoint_group("ep", "g1").await.expect("group");
        store.add_endpoint_group("ep", "g2").await.expect("group");
        assert_eq!(
            store.endpoint_groups("ep").await.expect("groups"),
            vec!["g1".to_string(), "g2".to_string()]
        );
        assert!(store.endpoint_groups("other").await.expect("groups").is_empty());
    }

    #[tokio::test]
    async fn endpoint_lookups_respect_owner() {
        let store = InMemoryStore::new();
        store
            .insert_endpoint(Endpoint {
                endpoint_uuid: "ep".to_string(),
                owner_id: 1,
                name: "cluster".to_string(),
                description: String::new(),
                status: EndpointStatus::Offline,
            })
            .await
            .expect("endpoint");
        assert!(store.endpoint_owned_by(1, "ep").await.expect("lookup").is_some());
        assert!(store.endpoint_owned_by(2, "ep").await.expect("lookup").is_none());
        assert_eq!(
            store
                .latest_endpoint("ep")
                .await
                .expect("lookup")
                .map(|e| e.owner_id),
            Some(1)
        );
    }

    #[tokio::test]
    async fn function_update_and_delete_touch_only_owner_rows() {
        let store = InMemoryStore::new();
        store
            .insert_function(function(1, "f1", "v1"))
            .await
            .expect("insert");
        store
            .insert_function(function(2, "f2", "other"))
            .await
            .expect("insert");
        store.add_function_group("f1", "g1").await.expect("group");

        let update = FunctionUpdate {
            name: "renamed".to_string(),
            description: "d".to_string(),
            code: "v2".to_string(),
            entry_point: "main".to_string(),
        };
        let err = store
            .update_function(2, "f1", update.clone())
            .await
            .expect_err("not owner");
        assert!(matches!(err, StoreError::NotFound(_)));
        store.update_function(1, "f1", update).await.expect("update");
        let latest = store.latest_function(1, "f1").await.expect("function");
        assert_eq!((latest.name.as_str(), latest.code.as_str()), ("renamed", "v2"));

        store.delete_function(1, "f1").await.expect("delete");
        assert!(store.latest_function(1, "f1").await.is_err());
        assert!(store.function_groups("f1").await.expect("groups").is_empty());
        let err = store.delete_function(1, "f1").await.expect_err("gone");
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.latest_function(2, "f2").await.is_ok());
    }

    #[tokio::test]
    async fn whitelist_entries_and_endpoint_delete() {
        let store = InMemoryStore::new();
        store
            .insert_endpoint(Endpoint {
                endpoint_uuid: "ep".to_string(),
                owner_id: 1,
                name: "cluster".to_string(),
                description: String::new(),
                status: EndpointStatus::Offline,
            })
            .await
            .expect("endpoint");
        store.add_whitelisted_function("ep", "f1").await.expect("add");
        store.add_whitelisted_function("ep", "f1").await.expect("add");
        store.add_whitelisted_function("ep", "f2").await.expect("add");
        store.add_endpoint_group("ep", "g1").await.expect("group");
        assert_eq!(
            store.whitelisted_functions("ep").await.expect("list"),
            vec!["f1".to_string(), "f2".to_string()]
        );
        assert!(store.remove_whitelisted_function("ep", "f2").await.expect("remove"));
        assert!(!store.remove_whitelisted_function("ep", "f2").await.expect("remove"));

        let err = store.delete_endpoint(2, "ep").await.expect_err("not owner");
        assert!(matches!(err, StoreError::NotFound(_)));
        store.delete_endpoint(1, "ep").await.expect("delete");
        assert!(store.latest_endpoint("ep").await.expect("lookup").is_none());
        assert!(store.whitelisted_functions("ep").await.expect("list").is_empty());
        assert!(store.endpoint_groups("ep").await.expect("groups").is_empty());
    }

    #[tokio::test]
    async fn task_insert_conflicts_and_status_updates() {
        let store = InMemoryStore::new();
        store.insert_task(task("t1", Some("ok"))).await.expect("task");
        let err = store.insert_task(task("t1", None)).await.expect_err("dup");
        assert!(matches!(err, StoreError::Conflict(_)));

        let later = Utc::now();
        store
            .update_task_status("t1", "success", later)
            .await
            .expect("update");
        let stored = store.get_task("t1").await.expect("task");
        assert_eq!(stored.status, "success");
        assert_eq!(stored.modified_at, later);
        assert_eq!(stored.result.as_deref(), Some("ok"));

        let err = store
            .update_task_status("missing", "success", later)
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
