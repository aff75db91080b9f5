//! One-shot question mode: ask, print, exit.

use crate::agent::Agent;
use crate::core::config::RuntimeConfig;
use crate::mcp::McpSession;
use std::error::Error;
use std::sync::Arc;

pub async fn run_ask(
    session: Arc<McpSession>,
    config: &RuntimeConfig,
    question: &str,
) -> Result<(), Box<dyn Error>> {
    let mut agent = Agent::new(session, config)?;
    let answer = agent.ask(question).await;
    println!("{answer}");
    Ok(())
}
