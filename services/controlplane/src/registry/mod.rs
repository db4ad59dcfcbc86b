//! Function and endpoint registries.
//!
//! # Purpose
//! Registration paths surface typed errors to the caller; a uuid is only
//! returned once its row has been written.
pub mod endpoint;
pub mod function;

pub use endpoint::EndpointRegistry;
pub use function::{FunctionRegistry, ResolvedFunction};
