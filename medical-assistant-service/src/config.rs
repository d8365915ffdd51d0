//! Runtime configuration, resolved once at startup and passed into the
//! service components. Nothing below the router reads the environment.

use anyhow::{Context as _, anyhow};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

pub const DEFAULT_SPECIALIST_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";
pub const DEFAULT_GENERAL_MODEL: &str = "mistralai/mixtral-8x7b-instruct";
pub const DEFAULT_VISION_MODEL: &str = "meta-llama/llama-3.2-90b-vision-instruct";

/// Model identifiers, one per role the service calls a model for.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Used by the Symptoms, Diagnosis, Treatment, Precautions and Rare specialists.
    pub specialist: String,
    /// Used by the default assistant, classification, summaries and analyses.
    pub general: String,
    pub vision: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            specialist: DEFAULT_SPECIALIST_MODEL.to_string(),
            general: DEFAULT_GENERAL_MODEL.to_string(),
            vision: DEFAULT_VISION_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Health data lives in memory when no database is configured.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Object storage is optional; image enrichment is skipped without it.
    pub object_storage_url: Option<String>,
    pub object_storage_key: Option<String>,
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub cors_origin: String,
    pub llm: LlmConfig,
    pub models: ModelConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            get(key).ok_or_else(|| anyhow!("{} environment variable is required", key))
        };

        let port = parse_or(get("PORT"), DEFAULT_PORT).context("PORT must be a valid port")?;
        let llm_timeout: u64 = parse_or(get("LLM_TIMEOUT_SECS"), 60)
            .context("LLM_TIMEOUT_SECS must be a number of seconds")?;
        let storage_timeout: u64 = parse_or(get("STORAGE_TIMEOUT_SECS"), 30)
            .context("STORAGE_TIMEOUT_SECS must be a number of seconds")?;
        let max_connections: u32 = parse_or(get("DB_MAX_CONNECTIONS"), 5)
            .context("DB_MAX_CONNECTIONS must be a positive integer")?;

        let defaults = ModelConfig::default();

        Ok(Self {
            port,
            cors_origin: get("CORS_ORIGIN").unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string()),
            llm: LlmConfig {
                api_key: required("OPENROUTER_API_KEY")?,
                timeout: Duration::from_secs(llm_timeout),
            },
            models: ModelConfig {
                specialist: get("SPECIALIST_MODEL").unwrap_or(defaults.specialist),
                general: get("DEFAULT_MODEL").unwrap_or(defaults.general),
                vision: get("VISION_MODEL").unwrap_or(defaults.vision),
            },
            storage: StorageConfig {
                database_url: get("DATABASE_URL"),
                max_connections,
                object_storage_url: get("SUPABASE_URL"),
                object_storage_key: get("SUPABASE_SERVICE_KEY"),
                download_timeout: Duration::from_secs(storage_timeout),
            },
        })
    }
}

fn parse_or<T>(value: Option<String>, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => Ok(raw.parse::<T>()?),
        None => Ok(default),
    }
}
