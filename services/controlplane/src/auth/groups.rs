//! Group membership lookups.
//!
//! # Purpose
//! Resolves the caller's active group ids. The caller's token cannot be sent
//! to the groups service directly; it is first exchanged for a dependent token
//! scoped to the groups resource server, which is then used to list the
//! identity's active memberships.
//!
//! # Key invariants
//! - Nothing is cached: every call performs both requests.
//! - A refused exchange is an [`AuthError::GroupExchange`]; an erroring
//!   service is a [`RemoteServiceError`].
use crate::auth::identity::BearerToken;
use crate::config::AuthServiceConfig;
use crate::error::{AuthError, ControlPlaneResult, RemoteServiceError};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const DEPENDENT_TOKEN_GRANT: &str = "urn:globus:auth:grant_type:dependent_token";
const TOKEN_SERVICE: &str = "dependent token exchange";
const GROUPS_SERVICE: &str = "group membership";

#[async_trait]
pub trait GroupMembershipGateway: Send + Sync {
    /// Ids of groups the token's identity is an active member of.
    async fn active_group_ids(&self, token: &BearerToken) -> ControlPlaneResult<HashSet<String>>;
}

#[derive(Debug, Deserialize)]
struct DependentToken {
    resource_server: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GroupSummary {
    id: String,
}

pub struct HttpGroupMembershipGateway {
    client: reqwest::Client,
    token_url: String,
    groups_url: String,
    resource_server: String,
    client_id: String,
    client_secret: String,
}

impl HttpGroupMembershipGateway {
    pub fn new(config: &AuthServiceConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("build group membership http client")?;
        Ok(Self {
            client,
            token_url: config.dependent_token_url.clone(),
            groups_url: config.groups_url.clone(),
            resource_server: config.groups_resource_server.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    async fn exchange(&self, token: &BearerToken) -> ControlPlaneResult<String> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", DEPENDENT_TOKEN_GRANT), ("token", token.secret())])
            .send()
            .await
            .map_err(|source| RemoteServiceError::Unreachable {
                service: TOKEN_SERVICE,
                source,
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::GroupExchange(format!("exchange refused with {status}")).into());
        }
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                service: TOKEN_SERVICE,
                status: status.as_u16(),
            }
            .into());
        }

        let tokens: Vec<DependentToken> =
            response
                .json()
                .await
                .map_err(|err| RemoteServiceError::InvalidResponse {
                    service: TOKEN_SERVICE,
                    detail: err.to_string(),
                })?;
        tokens
            .into_iter()
            .find(|t| t.resource_server == self.resource_server)
            .map(|t| t.access_token)
            .ok_or_else(|| {
                AuthError::GroupExchange(format!(
                    "no dependent token for {}",
                    self.resource_server
                ))
                .into()
            })
    }
}

#[async_trait]
impl GroupMembershipGateway for HttpGroupMembershipGateway {
    async fn active_group_ids(&self, token: &BearerToken) -> ControlPlaneResult<HashSet<String>> {
        let groups_token = self.exchange(token).await?;
        let response = self
            .client
            .get(&self.groups_url)
            .query(&[("statuses", "active")])
            .bearer_auth(groups_token)
            .send()
            .await
            .map_err(|source| RemoteServiceError::Unreachable {
                service: GROUPS_SERVICE,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                service: GROUPS_SERVICE,
                status: status.as_u16(),
            }
            .into());
        }
        let groups: Vec<GroupSummary> =
            response
                .json()
                .await
                .map_err(|err| RemoteServiceError::InvalidResponse {
                    service: GROUPS_SERVICE,
                    detail: err.to_string(),
                })?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }
}
