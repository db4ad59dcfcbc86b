//! Service wiring.
//!
//! # Purpose
//! [`ControlPlane`] owns one store handle and the HTTP collaborators, and
//! hands each service the narrow store trait it needs.
use crate::auth::{
    AccessControlService, BearerToken, GroupMembershipGateway, HttpGroupMembershipGateway,
    HttpTokenIntrospector, IdentityResolver, TokenIntrospector,
};
use crate::config::{ControlPlaneConfig, StorageBackend, TimeoutConfig};
use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::model::User;
use crate::registry::{EndpointRegistry, FunctionRegistry};
use crate::store::RegistryStore;
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use crate::tasks::TaskTracker;
use anyhow::Context;
use std::sync::Arc;

pub struct ControlPlane {
    pub store: Arc<dyn RegistryStore>,
    pub identity: IdentityResolver,
    pub access: AccessControlService,
    pub functions: FunctionRegistry,
    pub endpoints: EndpointRegistry,
    pub tasks: TaskTracker,
}

impl ControlPlane {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        introspector: Arc<dyn TokenIntrospector>,
        groups: Arc<dyn GroupMembershipGateway>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone(), introspector, timeouts),
            access: AccessControlService::new(store.clone(), store.clone(), groups, timeouts),
            functions: FunctionRegistry::new(store.clone(), timeouts),
            endpoints: EndpointRegistry::new(store.clone(), timeouts),
            tasks: TaskTracker::new(store.clone(), timeouts),
            store,
        }
    }

    pub async fn from_config(config: &ControlPlaneConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn RegistryStore> = match config.storage {
            StorageBackend::Memory => Arc::new(InMemoryStore::new()),
            StorageBackend::Postgres => {
                let pg = config
                    .postgres
                    .as_ref()
                    .context("postgres configuration missing")?;
                Arc::new(
                    PostgresStore::connect(pg)
                        .await
                        .context("connect postgres store")?,
                )
            }
        };
        let introspector = HttpTokenIntrospector::new(&config.auth, config.timeouts.remote)?;
        let groups = HttpGroupMembershipGateway::new(&config.auth, config.timeouts.remote)?;
        tracing::info!(
            backend = store.backend_name(),
            durable = store.is_durable(),
            "control plane store ready"
        );
        Ok(Self::new(
            store,
            Arc::new(introspector),
            Arc::new(groups),
            config.timeouts,
        ))
    }

    /// Authenticate the caller and require access to `endpoint_uuid`.
    ///
    /// Unknown endpoints and denials both surface as `AccessDenied`.
    pub async fn authorize_endpoint(
        &self,
        authorization: Option<&str>,
        endpoint_uuid: &str,
    ) -> ControlPlaneResult<(User, BearerToken)> {
        let (user, token) = self.identity.authenticate(authorization).await?;
        if !self.access.authorize(&user, endpoint_uuid, &token).await {
            return Err(ControlPlaneError::AccessDenied {
                endpoint_uuid: endpoint_uuid.to_string(),
            });
        }
        Ok((user, token))
    }

    /// Authenticate the caller and require both the right to run
    /// `function_uuid` and access to `endpoint_uuid`, whitelist included.
    ///
    /// The function is checked first.
    pub async fn authorize_submission(
        &self,
        authorization: Option<&str>,
        function_uuid: &str,
        endpoint_uuid: &str,
    ) -> ControlPlaneResult<(User, BearerToken)> {
        let (user, token) = self.identity.authenticate(authorization).await?;
        if !self
            .access
            .authorize_function(&user, function_uuid, &token)
            .await
        {
            return Err(ControlPlaneError::FunctionAccessDenied {
                function_uuid: function_uuid.to_string(),
            });
        }
        if !self
            .access
            .authorize_with_function(&user, endpoint_uuid, function_uuid, &token)
            .await
        {
            return Err(ControlPlaneError::AccessDenied {
                endpoint_uuid: endpoint_uuid.to_string(),
            });
        }
        Ok((user, token))
    }
}
