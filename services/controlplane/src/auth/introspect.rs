//! Token introspection client.
//!
//! The introspection service is an OAuth2 resource (RFC 7662): the control
//! plane posts the caller's token with its own client credentials and reads
//! back whether the token is active and who it belongs to.
use crate::auth::identity::{BearerToken, ExternalIdentity};
use crate::config::AuthServiceConfig;
use crate::error::{AuthError, ControlPlaneResult, RemoteServiceError};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "token introspection";

#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, token: &BearerToken) -> ControlPlaneResult<ExternalIdentity>;
}

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    username: Option<String>,
}

pub struct HttpTokenIntrospector {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenIntrospector {
    pub fn new(config: &AuthServiceConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("build introspection http client")?;
        Ok(Self {
            client,
            url: config.introspect_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenIntrospector for HttpTokenIntrospector {
    async fn introspect(&self, token: &BearerToken) -> ControlPlaneResult<ExternalIdentity> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token.secret())])
            .send()
            .await
            .map_err(|source| RemoteServiceError::Unreachable {
                service: SERVICE,
                source,
            })?;

        // The request authenticates the control plane, not the caller, so a
        // 401 or 403 here is a service misconfiguration.
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
            }
            .into());
        }

        let body: IntrospectionResponse =
            response
                .json()
                .await
                .map_err(|err| RemoteServiceError::InvalidResponse {
                    service: SERVICE,
                    detail: err.to_string(),
                })?;
        if !body.active {
            return Err(AuthError::InvalidCredential("token inactive".into()).into());
        }
        match body.username.filter(|name| !name.is_empty()) {
            Some(username) => Ok(ExternalIdentity::new(username)),
            None => Err(AuthError::InvalidCredential("token has no username".into()).into()),
        }
    }
}
