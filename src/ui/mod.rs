//! Full-screen terminal interface.

pub mod chat_loop;
