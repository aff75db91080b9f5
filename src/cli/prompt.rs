//! Plain line-based prompt loop for terminals where the full-screen interface
//! is unwanted (pipes, dumb terminals, scripting).

use crate::agent::{Agent, INTERRUPTED_MESSAGE};
use crate::core::config::RuntimeConfig;
use crate::core::message::{EXAMPLE_QUESTIONS, WELCOME_MESSAGE};
use crate::mcp::McpSession;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run_prompt(
    session: Arc<McpSession>,
    config: &RuntimeConfig,
) -> Result<(), Box<dyn Error>> {
    let mut agent = Agent::new(session, config)?;

    println!("{WELCOME_MESSAGE}");
    println!();
    println!("Example questions:");
    for question in EXAMPLE_QUESTIONS {
        println!("  - {question}");
    }
    println!();
    println!("Type /exit or /quit to leave. Ctrl+C interrupts a running question.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/exit" || question == "/quit" {
            break;
        }

        // Ctrl+C drops the in-flight question, not the loop.
        let answer = tokio::select! {
            answer = agent.ask(question) => answer,
            _ = tokio::signal::ctrl_c() => INTERRUPTED_MESSAGE.to_string(),
        };
        println!("{answer}");
        println!();
    }

    Ok(())
}
