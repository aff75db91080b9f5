//! Metascout is a terminal chat assistant for exploring dbt project metadata.
//!
//! It launches the dbt MCP metadata server as a subprocess, discovers the
//! tools the server advertises, and lets an OpenAI-compatible chat model call
//! those tools while answering questions about models, sources, metrics, and
//! documentation.

pub mod agent;
pub mod api;
pub mod cli;
pub mod core;
pub mod mcp;
pub mod ui;
