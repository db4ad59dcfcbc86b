//! Endpoint registration.
//!
//! Re-registering an endpoint uuid the caller already owns is a no-op that
//! returns the same uuid. A uuid owned by someone else is never handed back;
//! the caller gets a fresh endpoint instead.
//!
//! The function whitelist restricts which functions may run on an endpoint.
//! An empty whitelist leaves the endpoint unrestricted. Only the owner reads
//! or edits it.
use crate::config::TimeoutConfig;
use crate::deadline::bounded;
use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::model::{Endpoint, EndpointStatus, User};
use crate::store::EndpointStore;
use std::sync::Arc;
use uuid::Uuid;

pub struct EndpointRegistry {
    endpoints: Arc<dyn EndpointStore>,
    timeouts: TimeoutConfig,
}

impl EndpointRegistry {
    pub fn new(endpoints: Arc<dyn EndpointStore>, timeouts: TimeoutConfig) -> Self {
        Self {
            endpoints,
            timeouts,
        }
    }

    pub async fn register(
        &self,
        owner: &User,
        name: &str,
        description: &str,
        existing_uuid: Option<&str>,
    ) -> ControlPlaneResult<String> {
        if let Some(uuid) = existing_uuid {
            let existing = bounded(
                self.timeouts.store,
                "endpoint ownership lookup",
                self.endpoints.endpoint_owned_by(owner.id, uuid),
            )
            .await?;
            if let Some(endpoint) = existing {
                tracing::debug!(
                    owner_id = owner.id,
                    endpoint_uuid = uuid,
                    "endpoint already registered"
                );
                return Ok(endpoint.endpoint_uuid);
            }
        }

        let endpoint = Endpoint {
            endpoint_uuid: Uuid::new_v4().to_string(),
            owner_id: owner.id,
            name: name.to_string(),
            description: description.to_string(),
            status: EndpointStatus::Offline,
        };
        let stored = bounded(
            self.timeouts.store,
            "endpoint registration",
            self.endpoints.insert_endpoint(endpoint),
        )
        .await?;
        metrics::counter!("fnplane_endpoints_registered_total").increment(1);
        tracing::info!(
            owner_id = owner.id,
            endpoint_uuid = %stored.endpoint_uuid,
            name,
            "endpoint registered"
        );
        Ok(stored.endpoint_uuid)
    }

    /// Newest registration row for `endpoint_uuid`.
    pub async fn get(&self, endpoint_uuid: &str) -> ControlPlaneResult<Endpoint> {
        bounded(
            self.timeouts.store,
            "endpoint lookup",
            self.endpoints.latest_endpoint(endpoint_uuid),
        )
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound {
            entity: "endpoint",
            id: endpoint_uuid.to_string(),
        })
    }

    /// Attach an access group. Once an endpoint has any group, membership
    /// replaces ownership as the access rule.
    pub async fn add_access_group(
        &self,
        endpoint_uuid: &str,
        group_id: &str,
    ) -> ControlPlaneResult<()> {
        self.get(endpoint_uuid).await?;
        bounded(
            self.timeouts.store,
            "endpoint group insert",
            self.endpoints.add_endpoint_group(endpoint_uuid, group_id),
        )
        .await?;
        tracing::info!(endpoint_uuid, group_id, "endpoint access group added");
        Ok(())
    }

    pub async fn access_groups(&self, endpoint_uuid: &str) -> ControlPlaneResult<Vec<String>> {
        bounded(
            self.timeouts.store,
            "endpoint group lookup",
            self.endpoints.endpoint_groups(endpoint_uuid),
        )
        .await
    }

    /// Remove the owner's registration with its groups and whitelist.
    pub async fn delete(&self, owner: &User, endpoint_uuid: &str) -> ControlPlaneResult<()> {
        self.require_owner(owner, endpoint_uuid).await?;
        bounded(
            self.timeouts.store,
            "endpoint delete",
            self.endpoints.delete_endpoint(owner.id, endpoint_uuid),
        )
        .await
        .map_err(|err| err.for_entity("endpoint"))?;
        metrics::counter!("fnplane_endpoints_deleted_total").increment(1);
        tracing::info!(owner_id = owner.id, endpoint_uuid, "endpoint deleted");
        Ok(())
    }

    pub async fn add_whitelisted_functions(
        &self,
        owner: &User,
        endpoint_uuid: &str,
        function_uuids: &[String],
    ) -> ControlPlaneResult<()> {
        self.require_owner(owner, endpoint_uuid).await?;
        for function_uuid in function_uuids {
            bounded(
                self.timeouts.store,
                "whitelist insert",
                self.endpoints
                    .add_whitelisted_function(endpoint_uuid, function_uuid),
            )
            .await?;
        }
        tracing::info!(
            endpoint_uuid,
            added = function_uuids.len(),
            "endpoint whitelist extended"
        );
        Ok(())
    }

    pub async fn whitelisted_functions(
        &self,
        owner: &User,
        endpoint_uuid: &str,
    ) -> ControlPlaneResult<Vec<String>> {
        self.require_owner(owner, endpoint_uuid).await?;
        bounded(
            self.timeouts.store,
            "whitelist lookup",
            self.endpoints.whitelisted_functions(endpoint_uuid),
        )
        .await
    }

    /// `NotFound` with entity `whitelist entry` when the function was not listed.
    pub async fn remove_whitelisted_function(
        &self,
        owner: &User,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> ControlPlaneResult<()> {
        self.require_owner(owner, endpoint_uuid).await?;
        let removed = bounded(
            self.timeouts.store,
            "whitelist delete",
            self.endpoints
                .remove_whitelisted_function(endpoint_uuid, function_uuid),
        )
        .await?;
        if !removed {
            return Err(ControlPlaneError::NotFound {
                entity: "whitelist entry",
                id: function_uuid.to_string(),
            });
        }
        tracing::info!(endpoint_uuid, function_uuid, "endpoint whitelist entry removed");
        Ok(())
    }

    /// Unknown endpoints are `NotFound`; someone else's are `AccessDenied`.
    async fn require_owner(&self, owner: &User, endpoint_uuid: &str) -> ControlPlaneResult<()> {
        let owned = bounded(
            self.timeouts.store,
            "endpoint ownership lookup",
            self.endpoints.endpoint_owned_by(owner.id, endpoint_uuid),
        )
        .await?;
        if owned.is_some() {
            return Ok(());
        }
        self.get(endpoint_uuid).await?;
        Err(ControlPlaneError::AccessDenied {
            endpoint_uuid: endpoint_uuid.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn user(id: i64) -> User {
        User {
            id,
            username: format!("u{id}"),
            identity: format!("u{id}"),
            namespace: format!("u{id}"),
        }
    }

    #[tokio::test]
    async fn reregistering_owned_uuid_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let registry = EndpointRegistry::new(store.clone(), TimeoutConfig::default());
        let owner = user(1);
        let uuid = registry
            .register(&owner, "cluster", "", None)
            .await
            .expect("register");
        let again = registry
            .register(&owner, "renamed", "", Some(&uuid))
            .await
            .expect("register");
        assert_eq!(again, uuid);
        assert_eq!(store.endpoint_row_count().await, 1);
        let endpoint = registry.get(&uuid).await.expect("endpoint");
        assert_eq!(endpoint.name, "cluster");
        assert_eq!(endpoint.status, EndpointStatus::Offline);
    }

    #[tokio::test]
    async fn foreign_uuid_mints_a_new_endpoint() {
        let store = Arc::new(InMemoryStore::new());
        let registry = EndpointRegistry::new(store.clone(), TimeoutConfig::default());
        let theirs = registry
            .register(&user(1), "cluster", "", None)
            .await
            .expect("register");
        let mine = registry
            .register(&user(2), "cluster", "", Some(&theirs))
            .await
            .expect("register");
        assert_ne!(mine, theirs);
        assert_eq!(store.endpoint_row_count().await, 2);
        assert_eq!(registry.get(&theirs).await.expect("endpoint").owner_id, 1);
    }

    #[tokio::test]
    async fn access_groups_require_a_known_endpoint() {
        let registry =
            EndpointRegistry::new(Arc::new(InMemoryStore::new()), TimeoutConfig::default());
        let err = registry
            .add_access_group("missing", "g1")
            .await
            .expect_err("unknown endpoint");
        assert!(matches!(
            err,
            ControlPlaneError::NotFound { entity: "endpoint", .. }
        ));

        let uuid = registry
            .register(&user(1), "cluster", "", None)
            .await
            .expect("register");
        registry.add_access_group(&uuid, "g1").await.expect("group");
        assert_eq!(
            registry.access_groups(&uuid).await.expect("groups"),
            vec!["g1".to_string()]
        );
    }

    #[tokio::test]
    async fn whitelist_is_owner_only() {
        let registry =
            EndpointRegistry::new(Arc::new(InMemoryStore::new()), TimeoutConfig::default());
        let uuid = registry
            .register(&user(1), "cluster", "", None)
            .await
            .expect("register");
        let functions = vec!["fn-a".to_string(), "fn-b".to_string()];

        let err = registry
            .add_whitelisted_functions(&user(2), &uuid, &functions)
            .await
            .expect_err("stranger");
        assert!(matches!(err, ControlPlaneError::AccessDenied { .. }));
        let err = registry
            .whitelisted_functions(&user(1), "missing")
            .await
            .expect_err("unknown endpoint");
        assert!(matches!(
            err,
            ControlPlaneError::NotFound { entity: "endpoint", .. }
        ));

        registry
            .add_whitelisted_functions(&user(1), &uuid, &functions)
            .await
            .expect("whitelist");
        assert_eq!(
            registry
                .whitelisted_functions(&user(1), &uuid)
                .await
                .expect("list"),
            functions
        );
        registry
            .remove_whitelisted_function(&user(1), &uuid, "fn-a")
            .await
            .expect("remove");
        let err = registry
            .remove_whitelisted_function(&user(1), &uuid, "fn-a")
            .await
            .expect_err("already gone");
        assert!(matches!(
            err,
            ControlPlaneError::NotFound { entity: "whitelist entry", .. }
        ));
    }

    #[tokio::test]
    async fn delete_clears_endpoint_state() {
        let store = Arc::new(InMemoryStore::new());
        let registry = EndpointRegistry::new(store.clone(), TimeoutConfig::default());
        let uuid = registry
            .register(&user(1), "cluster", "", None)
            .await
            .expect("register");
        registry.add_access_group(&uuid, "g1").await.expect("group");

        let err = registry.delete(&user(2), &uuid).await.expect_err("stranger");
        assert!(matches!(err, ControlPlaneError::AccessDenied { .. }));
        registry.delete(&user(1), &uuid).await.expect("delete");
        assert_eq!(store.endpoint_row_count().await, 0);
        assert!(registry.access_groups(&uuid).await.expect("groups").is_empty());
        let err = registry.delete(&user(1), &uuid).await.expect_err("gone");
        assert!(matches!(
            err,
            ControlPlaneError::NotFound { entity: "endpoint", .. }
        ));
    }
}
