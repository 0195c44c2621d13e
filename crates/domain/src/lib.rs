//! Shared domain types for HostBridge: configuration, the error taxonomy,
//! the canonical invocation model, and tool descriptors.

pub mod config;
pub mod error;
pub mod invocation;
pub mod schema;
pub mod tool;

pub use error::{Error, Result};
