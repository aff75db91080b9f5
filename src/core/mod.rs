//! Cross-cutting pieces shared by every front end: environment-driven
//! configuration and the conversation transcript.

pub mod config;
pub mod message;
