//! Prints the metadata server's advertised tools.

use crate::agent::registry::ToolRegistry;
use crate::mcp::McpSession;
use std::error::Error;

pub async fn run_tool_list(session: &McpSession) -> Result<(), Box<dyn Error>> {
    session.connect().await?;
    let registry = ToolRegistry::discover(session).await?;

    if registry.is_empty() {
        println!("The metadata server advertised no tools.");
        return Ok(());
    }

    println!(
        "{} tool{} available:",
        registry.len(),
        if registry.len() == 1 { "" } else { "s" }
    );
    println!();
    for (index, spec) in registry.specs().iter().enumerate() {
        println!("{:3}. {}", index + 1, spec.name);
        if let Some(description) = &spec.description {
            for line in description.lines() {
                println!("     {}", line.trim_end());
            }
        }
    }
    Ok(())
}
