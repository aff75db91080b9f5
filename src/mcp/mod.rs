//! Metadata-server connectivity: subprocess transport, wire parsing, and the
//! session client.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::McpSession;
