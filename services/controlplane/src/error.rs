//! Error kinds surfaced by the control-plane services.
//!
//! # Purpose
//! Separates credential failures, remote collaborator failures and store
//! failures so callers can map them onto their own responses. Decision paths
//! never surface these (they deny instead); registry and identity paths do.
use crate::store::StoreError;
use thiserror::Error;

/// Credential problems: missing, malformed, rejected, or a failed group exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("malformed bearer credential")]
    MalformedCredential,
    #[error("credential rejected: {0}")]
    InvalidCredential(String),
    #[error("group membership exchange failed: {0}")]
    GroupExchange(String),
}

/// Failures talking to the introspection or group membership services.
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("{service} unreachable: {source}")]
    Unreachable {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{service} returned an invalid response: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    RemoteService(#[from] RemoteServiceError),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("access denied to endpoint {endpoint_uuid}")]
    AccessDenied { endpoint_uuid: String },
    #[error("access denied to function {function_uuid}")]
    FunctionAccessDenied { function_uuid: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

impl From<StoreError> for ControlPlaneError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ControlPlaneError::NotFound {
                entity: "record",
                id,
            },
            other => ControlPlaneError::Store(other),
        }
    }
}

impl ControlPlaneError {
    /// Replace the generic entity label of a store-level not-found.
    pub fn for_entity(self, entity: &'static str) -> Self {
        match self {
            ControlPlaneError::NotFound { id, .. } => ControlPlaneError::NotFound { entity, id },
            other => other,
        }
    }
}
