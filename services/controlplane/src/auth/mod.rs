//! Control-plane authentication and authorization modules.
//!
//! # Purpose
//! Groups bearer credential handling, token introspection, user resolution,
//! group membership lookup, and the endpoint and function access decisions.
pub mod access;
pub mod groups;
pub mod identity;
pub mod introspect;

pub use access::{AccessControlService, AccessDecision};
pub use groups::{GroupMembershipGateway, HttpGroupMembershipGateway};
pub use identity::{BearerToken, ExternalIdentity, IdentityResolver, derive_namespace};
pub use introspect::{HttpTokenIntrospector, TokenIntrospector};
