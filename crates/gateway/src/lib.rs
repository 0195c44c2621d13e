//! HostBridge gateway — one registry of host tools exposed over REST and
//! MCP, with policy enforcement, human-in-the-loop approval, auditing, a
//! memory graph, and a DAG plan executor.

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod cli;
pub mod mcp;
pub mod runtime;
pub mod state;
