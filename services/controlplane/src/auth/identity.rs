//! Caller identity resolution.
//!
//! # Purpose
//! Turns an `Authorization` header into a stable [`User`]: the bearer token is
//! introspected into an external identity, which is then looked up or
//! provisioned on first sight.
//!
//! # Key invariants
//! - Provisioning goes through [`UserStore::upsert_user`], an atomic
//!   insert-or-fetch, so concurrent first calls for one identity converge on
//!   a single stored user.
//! - Tokens are never logged; [`BearerToken`]'s `Debug` output is redacted.
use crate::auth::introspect::TokenIntrospector;
use crate::config::TimeoutConfig;
use crate::deadline::bounded;
use crate::error::{AuthError, ControlPlaneResult};
use crate::model::{NewUser, User};
use crate::store::UserStore;
use std::fmt;
use std::sync::Arc;

/// Opaque bearer credential presented by a caller.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse an `Authorization` header value of the form `Bearer <token>`.
    ///
    /// The scheme name is case-insensitive (RFC 7235).
    pub fn from_header(header: Option<&str>) -> Result<Self, AuthError> {
        let header = header.ok_or(AuthError::MissingCredential)?;
        let (scheme, token) = header
            .trim_start()
            .split_once(' ')
            .ok_or(AuthError::MalformedCredential)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::MalformedCredential);
        }
        let token = token.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(AuthError::MalformedCredential);
        }
        Ok(Self(token.to_string()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Identity string asserted by the introspection service, e.g. `jane@uchicago.edu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalIdentity(String);

impl ExternalIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short name for a user: `<local-part>_<first-domain-label>`.
///
/// Identities without a domain (or with an empty first label) fall back to
/// the local part alone.
pub fn derive_namespace(identity: &str) -> String {
    let mut parts = identity.split('@');
    let local = parts.next().unwrap_or_default();
    let org = parts
        .next()
        .and_then(|domain| domain.split('.').next())
        .filter(|label| !label.is_empty());
    match org {
        Some(org) => format!("{local}_{org}"),
        None => local.to_string(),
    }
}

pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
    introspector: Arc<dyn TokenIntrospector>,
    timeouts: TimeoutConfig,
}

impl IdentityResolver {
    pub fn new(
        users: Arc<dyn UserStore>,
        introspector: Arc<dyn TokenIntrospector>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            users,
            introspector,
            timeouts,
        }
    }

    /// Ask the introspection service who owns `token`.
    pub async fn introspect(&self, token: &BearerToken) -> ControlPlaneResult<ExternalIdentity> {
        bounded(
            self.timeouts.remote,
            "token introspection",
            self.introspector.introspect(token),
        )
        .await
    }

    /// Look up the user for `identity`, provisioning it on first sight.
    pub async fn resolve(&self, identity: &ExternalIdentity) -> ControlPlaneResult<User> {
        let existing = bounded(
            self.timeouts.store,
            "user lookup",
            self.users.find_user(identity.as_str()),
        )
        .await?;
        if let Some(user) = existing {
            return Ok(user);
        }

        let namespace = derive_namespace(identity.as_str());
        let user = bounded(
            self.timeouts.store,
            "user provisioning",
            self.users.upsert_user(NewUser {
                username: identity.as_str().to_string(),
                identity: identity.as_str().to_string(),
                namespace,
            }),
        )
        .await?;
        metrics::counter!("fnplane_user_provisioning_total").increment(1);
        tracing::info!(user_id = user.id, namespace = %user.namespace, "resolved new identity");
        Ok(user)
    }

    /// Full request path: parse the header, introspect, then resolve.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> ControlPlaneResult<(User, BearerToken)> {
        let token = BearerToken::from_header(authorization)?;
        let identity = self.introspect(&token).await.inspect_err(|err| {
            tracing::debug!(error = %err, "credential introspection failed");
        })?;
        let user = self.resolve(&identity).await?;
        Ok((user, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlPlaneError;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct StaticIntrospector;

    #[async_trait]
    impl TokenIntrospector for StaticIntrospector {
        async fn introspect(&self, token: &BearerToken) -> ControlPlaneResult<ExternalIdentity> {
            match token.secret() {
                "good" => Ok(ExternalIdentity::new("jane@uchicago.edu")),
                _ => Err(AuthError::InvalidCredential("token inactive".into()).into()),
            }
        }
    }

    fn resolver(store: Arc<InMemoryStore>) -> IdentityResolver {
        IdentityResolver::new(store, Arc::new(StaticIntrospector), TimeoutConfig::default())
    }

    #[test]
    fn namespace_uses_local_part_and_first_domain_label() {
        assert_eq!(derive_namespace("jane@uchicago.edu"), "jane_uchicago");
        assert_eq!(derive_namespace("bob@cs.example.org"), "bob_cs");
        assert_eq!(derive_namespace("service-account"), "service-account");
        assert_eq!(derive_namespace("odd@"), "odd");
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(
            BearerToken::from_header(Some("Bearer abc")).expect("token").secret(),
            "abc"
        );
        assert!(matches!(
            BearerToken::from_header(None),
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            BearerToken::from_header(Some("Basic abc")),
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            BearerToken::from_header(Some("Bearer ")),
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            BearerToken::from_header(Some("Bearer a b")),
            Err(AuthError::MalformedCredential)
        ));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for header in ["bearer abc", "BEARER abc", "BeArEr  abc "] {
            assert_eq!(
                BearerToken::from_header(Some(header)).expect(header).secret(),
                "abc"
            );
        }
        assert!(matches!(
            BearerToken::from_header(Some("Bearerabc")),
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            BearerToken::from_header(Some("bearers abc")),
            Err(AuthError::MalformedCredential)
        ));
    }

    #[test]
    fn bearer_debug_is_redacted() {
        let token = BearerToken::new("super-secret");
        assert!(!format!("{token:?}").contains("super-secret"));
    }

    #[tokio::test]
    async fn authenticate_provisions_once() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = resolver(store.clone());
        let (first, _) = resolver
            .authenticate(Some("Bearer good"))
            .await
            .expect("user");
        let (second, _) = resolver
            .authenticate(Some("Bearer good"))
            .await
            .expect("user");
        assert_eq!(first.id, second.id);
        assert_eq!(first.namespace, "jane_uchicago");
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_credentials_resolve_no_user() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = resolver(store.clone());
        let err = resolver
            .authenticate(Some("Bearer bad"))
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            ControlPlaneError::Auth(AuthError::InvalidCredential(_))
        ));
        let err = resolver.authenticate(None).await.expect_err("missing");
        assert!(matches!(
            err,
            ControlPlaneError::Auth(AuthError::MissingCredential)
        ));
        assert_eq!(store.user_count().await, 0);
    }
}
