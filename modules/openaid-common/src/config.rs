use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI provider
    pub anthropic_api_key: String,
    pub judge_model: String,

    // Geocoding + cross-referencing
    pub google_maps_api_key: String,
    pub civic_directory_url: Option<String>,

    // Publication endpoint (only used by the HTTP publisher)
    pub publication_url: Option<String>,
    pub publication_api_key: Option<String>,

    // Per-run LLM spend ceiling in cents
    pub run_budget_cents: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            judge_model: env::var("JUDGE_MODEL")
                .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
            google_maps_api_key: required_env("GOOGLE_MAPS_API_KEY"),
            civic_directory_url: env::var("CIVIC_DIRECTORY_URL").ok(),
            publication_url: env::var("PUBLICATION_URL").ok(),
            publication_api_key: env::var("PUBLICATION_API_KEY").ok(),
            run_budget_cents: env::var("RUN_BUDGET_CENTS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .expect("RUN_BUDGET_CENTS must be a number"),
        }
    }

    /// Log the loaded configuration without exposing secrets.
    pub fn log_redacted(&self) {
        info!(
            judge_model = self.judge_model.as_str(),
            civic_directory = self.civic_directory_url.is_some(),
            publication = self.publication_url.is_some(),
            run_budget_cents = self.run_budget_cents,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
