//! Endpoint and function access decisions.
//!
//! # Purpose
//! Decides whether a user may act on an endpoint. Two exclusive modes:
//! - the endpoint has access groups: the caller must be an active member of
//!   at least one of them, ownership is ignored;
//! - the endpoint has none: the caller must own the most recent registration
//!   row for the endpoint uuid.
//!
//! A function may be run by its owner or by an active member of a group it
//! is shared with. A submission also needs the function to be on the
//! endpoint's whitelist whenever that whitelist is non-empty.
//!
//! # Key invariants
//! - Fail closed. Store errors, timeouts and group exchange failures all deny.
//! - Policy and memberships are re-read on every decision.
//! - The caller's credential never reaches a log line.
use crate::auth::groups::GroupMembershipGateway;
use crate::auth::identity::BearerToken;
use crate::config::TimeoutConfig;
use crate::deadline::bounded;
use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::model::User;
use crate::store::{EndpointStore, FunctionStore};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    GrantedByGroup,
    GrantedByOwnership,
    DeniedNoSharedGroup,
    DeniedNotOwner,
    DeniedUnknownEndpoint,
    DeniedFunctionNotWhitelisted,
    DeniedError,
}

impl AccessDecision {
    pub fn is_granted(self) -> bool {
        matches!(
            self,
            AccessDecision::GrantedByGroup | AccessDecision::GrantedByOwnership
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            AccessDecision::GrantedByGroup => "granted_group",
            AccessDecision::GrantedByOwnership => "granted_owner",
            AccessDecision::DeniedNoSharedGroup => "denied_no_shared_group",
            AccessDecision::DeniedNotOwner => "denied_not_owner",
            AccessDecision::DeniedUnknownEndpoint => "denied_unknown_endpoint",
            AccessDecision::DeniedFunctionNotWhitelisted => "denied_not_whitelisted",
            AccessDecision::DeniedError => "denied_error",
        }
    }
}

pub struct AccessControlService {
    endpoints: Arc<dyn EndpointStore>,
    functions: Arc<dyn FunctionStore>,
    groups: Arc<dyn GroupMembershipGateway>,
    timeouts: TimeoutConfig,
}

impl AccessControlService {
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        functions: Arc<dyn FunctionStore>,
        groups: Arc<dyn GroupMembershipGateway>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            endpoints,
            functions,
            groups,
            timeouts,
        }
    }

    pub async fn authorize(&self, user: &User, endpoint_uuid: &str, token: &BearerToken) -> bool {
        self.decide(user, endpoint_uuid, token).await.is_granted()
    }

    /// Like [`authorize`](Self::authorize) but reports which rule decided.
    pub async fn decide(
        &self,
        user: &User,
        endpoint_uuid: &str,
        token: &BearerToken,
    ) -> AccessDecision {
        let decision = self.evaluate(user, endpoint_uuid, token).await;
        settle(user, "endpoint", endpoint_uuid, decision)
    }

    pub async fn authorize_function(
        &self,
        user: &User,
        function_uuid: &str,
        token: &BearerToken,
    ) -> bool {
        self.decide_function(user, function_uuid, token)
            .await
            .is_granted()
    }

    /// Owner first, then the groups the function is shared with.
    pub async fn decide_function(
        &self,
        user: &User,
        function_uuid: &str,
        token: &BearerToken,
    ) -> AccessDecision {
        let decision = self.evaluate_function(user, function_uuid, token).await;
        settle(user, "function", function_uuid, decision)
    }

    /// Endpoint access plus the endpoint's function whitelist.
    pub async fn authorize_with_function(
        &self,
        user: &User,
        endpoint_uuid: &str,
        function_uuid: &str,
        token: &BearerToken,
    ) -> bool {
        self.decide_with_function(user, endpoint_uuid, function_uuid, token)
            .await
            .is_granted()
    }

    pub async fn decide_with_function(
        &self,
        user: &User,
        endpoint_uuid: &str,
        function_uuid: &str,
        token: &BearerToken,
    ) -> AccessDecision {
        let decision = self.decide(user, endpoint_uuid, token).await;
        if !decision.is_granted() {
            return decision;
        }
        let whitelisted = self.whitelist_allows(endpoint_uuid, function_uuid).await;
        let checked = match whitelisted {
            Ok(true) => Ok(decision),
            Ok(false) => Ok(AccessDecision::DeniedFunctionNotWhitelisted),
            Err(err) => Err(err),
        };
        settle(user, "whitelist", endpoint_uuid, checked)
    }

    async fn whitelist_allows(
        &self,
        endpoint_uuid: &str,
        function_uuid: &str,
    ) -> ControlPlaneResult<bool> {
        let whitelist = bounded(
            self.timeouts.store,
            "whitelist lookup",
            self.endpoints.whitelisted_functions(endpoint_uuid),
        )
        .await?;
        Ok(whitelist.is_empty() || whitelist.iter().any(|f| f == function_uuid))
    }

    async fn evaluate_function(
        &self,
        user: &User,
        function_uuid: &str,
        token: &BearerToken,
    ) -> ControlPlaneResult<AccessDecision> {
        let owned = bounded(
            self.timeouts.store,
            "function lookup",
            self.functions.latest_function(user.id, function_uuid),
        )
        .await;
        match owned {
            Ok(_) => return Ok(AccessDecision::GrantedByOwnership),
            Err(ControlPlaneError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        let function_groups = bounded(
            self.timeouts.store,
            "function group lookup",
            self.functions.function_groups(function_uuid),
        )
        .await?;
        if function_groups.is_empty() {
            return Ok(AccessDecision::DeniedNotOwner);
        }
        self.shares_group(&function_groups, token).await
    }

    async fn evaluate(
        &self,
        user: &User,
        endpoint_uuid: &str,
        token: &BearerToken,
    ) -> ControlPlaneResult<AccessDecision> {
        let endpoint_groups = bounded(
            self.timeouts.store,
            "endpoint group lookup",
            self.endpoints.endpoint_groups(endpoint_uuid),
        )
        .await?;

        if !endpoint_groups.is_empty() {
            return self.shares_group(&endpoint_groups, token).await;
        }

        let endpoint = bounded(
            self.timeouts.store,
            "endpoint lookup",
            self.endpoints.latest_endpoint(endpoint_uuid),
        )
        .await?;
        Ok(match endpoint {
            None => AccessDecision::DeniedUnknownEndpoint,
            Some(endpoint) if endpoint.owner_id == user.id => AccessDecision::GrantedByOwnership,
            Some(_) => AccessDecision::DeniedNotOwner,
        })
    }

    async fn shares_group(
        &self,
        required: &[String],
        token: &BearerToken,
    ) -> ControlPlaneResult<AccessDecision> {
        let memberships = bounded(
            self.timeouts.remote,
            "group membership lookup",
            self.groups.active_group_ids(token),
        )
        .await?;
        Ok(if required.iter().any(|group| memberships.contains(group)) {
            AccessDecision::GrantedByGroup
        } else {
            AccessDecision::DeniedNoSharedGroup
        })
    }
}

/// Collapse errors to a denial, then log and count the outcome.
fn settle(
    user: &User,
    target: &'static str,
    target_id: &str,
    evaluated: ControlPlaneResult<AccessDecision>,
) -> AccessDecision {
    let decision = match evaluated {
        Ok(decision) => decision,
        Err(err) => {
            tracing::warn!(
                user_id = user.id,
                target,
                target_id,
                error = %err,
                "access check failed, denying"
            );
            AccessDecision::DeniedError
        }
    };
    metrics::counter!(
        "fnplane_access_decisions_total",
        "target" => target,
        "outcome" => decision.as_str()
    )
    .increment(1);
    tracing::debug!(
        user_id = user.id,
        target,
        target_id,
        outcome = decision.as_str(),
        "access decision"
    );
    decision
}
