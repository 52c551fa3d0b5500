//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Dispatch core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key for the synthesis provider (optional - fallback synthesis works without it)
    pub anthropic_api_key: Option<String>,

    /// Model used for capability synthesis
    pub synth_model: String,

    /// Synthesis provider endpoint
    pub synth_url: String,

    /// Upper bound on a single synthesis-provider call
    pub synth_timeout: Duration,

    /// Directory service base URL (optional - falls back to a local snapshot)
    pub directory_url: Option<String>,

    /// Bearer token for the directory service (optional)
    pub directory_token: Option<String>,

    /// Path to a directory snapshot file for offline operation (optional)
    pub directory_snapshot: Option<PathBuf>,

    /// Durable capability catalog path
    pub catalog_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();

        let synth_model = std::env::var("CAPFORGE_SYNTH_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

        let synth_url = std::env::var("CAPFORGE_SYNTH_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string());

        let synth_timeout = std::env::var("CAPFORGE_SYNTH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20));

        let directory_url = std::env::var("CAPFORGE_DIRECTORY_URL").ok();
        let directory_token = std::env::var("CAPFORGE_DIRECTORY_TOKEN").ok();

        let directory_snapshot = std::env::var("CAPFORGE_DIRECTORY_SNAPSHOT")
            .ok()
            .map(PathBuf::from);

        let catalog_path = std::env::var("CAPFORGE_CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("capforge")
                    .join("catalog.json")
            });

        Ok(Self {
            anthropic_api_key,
            synth_model,
            synth_url,
            synth_timeout,
            directory_url,
            directory_token,
            directory_snapshot,
            catalog_path,
        })
    }
}
