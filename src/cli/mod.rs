//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the
//! appropriate commands.

pub mod ask;
pub mod prompt;
pub mod tool_list;

use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::ask::run_ask;
use crate::cli::prompt::run_prompt;
use crate::cli::tool_list::run_tool_list;
use crate::core::config::RuntimeConfig;
use crate::mcp::McpSession;
use crate::ui::chat_loop::run_chat;

#[derive(Parser)]
#[command(name = "metascout")]
#[command(about = "A terminal chat assistant for exploring dbt project metadata")]
#[command(
    long_about = "Metascout answers questions about a dbt project's models, sources, \
metrics, and documentation. It launches the dbt MCP metadata server as a subprocess, \
discovers the tools it advertises, and lets an OpenAI-compatible model call them \
while you chat.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key for the chat endpoint (required)\n\
  OPENAI_BASE_URL   Chat endpoint base URL (optional, defaults to https://api.openai.com/v1)\n\
  OPENAI_MODEL      Model name (optional, defaults to gpt-5-mini)\n\
  DBT_MCP_ENV       Path to the dbt MCP credentials file (optional, defaults to ./.env)\n\
  METASCOUT_LOG     Append diagnostic logs to this file (optional)\n\n\
Controls (chat interface):\n\
  Type              Enter your question in the input field\n\
  Enter             Send the question\n\
  Esc               Interrupt the in-flight question\n\
  /help             Show commands\n\
  /quit             Exit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the full-screen chat interface (default)
    Chat,
    /// Ask questions from a plain line-based prompt
    Prompt,
    /// Ask a single question and print the answer
    Ask {
        /// The question, given as one or more words
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// List the tools the metadata server advertises
    Tools,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    // One session for the whole process; every front end shares it.
    let session = Arc::new(McpSession::new(config.launch_spec()));

    let result = match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(session.clone(), &config).await,
        Commands::Prompt => run_prompt(session.clone(), &config).await,
        Commands::Ask { question } => {
            run_ask(session.clone(), &config, &question.join(" ")).await
        }
        Commands::Tools => run_tool_list(&session).await,
    };

    session.close().await;
    result
}

/// Diagnostics go to the file named by `METASCOUT_LOG` when set, otherwise to
/// stderr. The filter stays quiet unless `RUST_LOG` says otherwise, so the
/// full-screen interface is never scribbled over.
fn init_tracing() {
    match RuntimeConfig::log_file() {
        Some(path) => {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("metascout=debug"));
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    let _ = tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .try_init();
                }
                Err(err) => {
                    eprintln!("Could not open log file {}: {err}", path.display());
                }
            }
        }
        None => {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
