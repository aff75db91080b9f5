//! Environment-derived runtime configuration.
//!
//! All configuration comes from environment variables; nothing is persisted.
//! Validation happens once at startup so every missing prerequisite is
//! reported with remediation instructions before any subprocess or network
//! activity is attempted.

use std::env;
use std::error::Error;
use std::path::PathBuf;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_CREDENTIALS_FILE: &str = "DBT_MCP_ENV";
pub const ENV_LOG_FILE: &str = "METASCOUT_LOG";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_CREDENTIALS_FILE: &str = "./.env";

const METADATA_SERVER_COMMAND: &str = "uvx";
const METADATA_SERVER_PACKAGE: &str = "dbt-mcp";

/// Command line used to launch the metadata server subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub credentials_file: PathBuf,
}

impl RuntimeConfig {
    /// Reads and validates configuration from the process environment.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`], but with an injectable variable
    /// lookup so validation is testable without mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = match lookup(ENV_API_KEY).filter(|value| !value.trim().is_empty()) {
            Some(key) => key,
            None => {
                return Err(format!(
                    "{ENV_API_KEY} is not set.\n\n\
                     Please set your OpenAI API key:\n\
                     export {ENV_API_KEY}=\"your-api-key-here\""
                )
                .into())
            }
        };

        let credentials_file = PathBuf::from(
            lookup(ENV_CREDENTIALS_FILE)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string()),
        );
        if !credentials_file.is_file() {
            return Err(format!(
                "Cannot find warehouse credentials file: {}\n\n\
                 Set {ENV_CREDENTIALS_FILE} to the path of the .env file used by {METADATA_SERVER_PACKAGE}.",
                credentials_file.display()
            )
            .into());
        }

        let base_url = lookup(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = lookup(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            base_url,
            model,
            credentials_file,
        })
    }

    /// The fixed command line for the metadata server subprocess. Only the
    /// credentials file path varies.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: METADATA_SERVER_COMMAND.to_string(),
            args: vec![
                "--env-file".to_string(),
                self.credentials_file.display().to_string(),
                METADATA_SERVER_PACKAGE.to_string(),
            ],
        }
    }

    pub fn log_file() -> Option<PathBuf> {
        env::var(ENV_LOG_FILE)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    }
}
