//! Control-plane identity, authorization and registry library crate.
//!
//! # Purpose
//! Resolves callers from bearer credentials, decides endpoint access, keeps
//! the function/endpoint registries and task bookkeeping, and normalizes
//! computed results before they leave the service.
//!
//! # Notes
//! The HTTP surface lives outside this crate; everything here is reachable
//! through [`app::ControlPlane`] or the individual services it wires.
pub mod app;
pub mod auth;
pub mod config;
pub mod deadline;
pub mod error;
pub mod model;
pub mod observability;
pub mod registry;
pub mod result;
pub mod store;
pub mod tasks;
