//! Control-plane data model module.
//!
//! # Purpose
//! Re-exports the user, function, endpoint and task records shared by the
//! store backends and the services built on them.
mod endpoint;
mod function;
mod task;
mod user;

pub use endpoint::{Endpoint, EndpointStatus};
pub use function::{Function, FunctionStatus, FunctionUpdate};
pub use task::{RequestLogEntry, TaskRecord, TaskSubmission};
pub use user::{NewUser, User};
