//! Pipeline configuration

use crate::agent::module::DEFAULT_REPAIR_ATTEMPTS;

/// Configuration loaded from environment variables
pub struct Config {
    /// Anthropic API key; the pipeline cannot run live without it.
    pub anthropic_api_key: Option<String>,
    /// Optional NCBI key, appended to E-utilities requests when present.
    pub ncbi_api_key: Option<String>,
    /// Override for the Claude model name.
    pub model: Option<String>,
    /// Validate-repair loop attempt budget.
    pub repair_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            ncbi_api_key: std::env::var("NCBI_API_KEY").ok(),
            model: std::env::var("CLAUDE_MODEL").ok(),
            repair_attempts: std::env::var("REPAIR_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_REPAIR_ATTEMPTS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            ncbi_api_key: None,
            model: None,
            repair_attempts: DEFAULT_REPAIR_ATTEMPTS,
        }
    }
}
