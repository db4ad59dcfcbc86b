//! User records keyed by external identity.
use serde::{Deserialize, Serialize};

/// A provisioned caller. `id` is store-assigned and never leaves the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub identity: String,
    pub namespace: String,
}

/// Insert payload for first-sight provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub identity: String,
    pub namespace: String,
}
