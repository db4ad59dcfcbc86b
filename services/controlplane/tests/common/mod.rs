#![allow(dead_code)]

use async_trait::async_trait;
use fnplane_controlplane::auth::{
    BearerToken, ExternalIdentity, GroupMembershipGateway, TokenIntrospector,
};
use fnplane_controlplane::error::{AuthError, ControlPlaneResult, RemoteServiceError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Maps token secrets to identities; any other token is rejected.
#[derive(Default)]
pub struct TableIntrospector {
    identities: HashMap<String, String>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl TableIntrospector {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            identities: pairs
                .iter()
                .map(|(token, identity)| (token.to_string(), identity.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TokenIntrospector for TableIntrospector {
    async fn introspect(&self, token: &BearerToken) -> ControlPlaneResult<ExternalIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.identities
            .get(token.secret())
            .map(ExternalIdentity::new)
            .ok_or_else(|| AuthError::InvalidCredential("token inactive".into()).into())
    }
}

/// Group memberships keyed by token secret.
pub enum FakeGroups {
    Table(HashMap<String, HashSet<String>>),
    Unavailable,
    Hang,
}

impl FakeGroups {
    pub fn table(pairs: &[(&str, &[&str])]) -> Self {
        FakeGroups::Table(
            pairs
                .iter()
                .map(|(token, groups)| {
                    (
                        token.to_string(),
                        groups.iter().map(|g| g.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl GroupMembershipGateway for FakeGroups {
    async fn active_group_ids(&self, token: &BearerToken) -> ControlPlaneResult<HashSet<String>> {
        match self {
            FakeGroups::Table(table) => Ok(table.get(token.secret()).cloned().unwrap_or_default()),
            FakeGroups::Unavailable => Err(RemoteServiceError::Status {
                service: "group membership",
                status: 503,
            }
            .into()),
            FakeGroups::Hang => {
                std::future::pending::<()>().await;
                Ok(HashSet::new())
            }
        }
    }
}
