//! Configuration loaded from a TOML file plus environment variable overrides,
//! following the `Config`/`RuntimeConfig` split used throughout this codebase's
//! ancestry: versionable knobs live in `Config`, secrets and deployment
//! specifics live in `RuntimeConfig` and are never serialized.

use serde::{Deserialize, Serialize};

/// Versionable measurement knobs, loadable from `logitprobe.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub estimator: EstimatorConfig,
    pub sampling: SamplingConfig,
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimatorConfig {
    pub b: usize,
    pub trim: f64,
    pub stability_width: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    pub max_output_tokens: u32,
    pub max_prompt_chars: usize,
}

/// Runtime configuration loaded from environment variables. Never persisted
/// or serialized as part of `Config`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub provider_api_key: Option<String>,
    pub storage_path: String,
    pub bank_dir: String,
    pub concurrency: usize,
    pub fixed_seed: Option<u64>,
    pub mock: bool,
    pub no_cache: bool,
    pub provider_timeout_ms: u64,
    pub transport_retry_budget: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider_api_key: None,
            storage_path: "logitprobe.sqlite3".to_string(),
            bank_dir: "banks".to_string(),
            concurrency: 8,
            fixed_seed: None,
            mock: false,
            no_cache: false,
            provider_timeout_ms: 20_000,
            transport_retry_budget: 3,
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables, env-first.
    pub fn load_from_env() -> Self {
        Self {
            provider_api_key: std::env::var("LOGITPROBE_PROVIDER_API_KEY").ok(),
            storage_path: std::env::var("LOGITPROBE_STORAGE_PATH")
                .unwrap_or_else(|_| "logitprobe.sqlite3".to_string()),
            bank_dir: std::env::var("LOGITPROBE_BANK_DIR").unwrap_or_else(|_| "banks".to_string()),
            concurrency: std::env::var("LOGITPROBE_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(8),
            fixed_seed: std::env::var("LOGITPROBE_FIXED_SEED")
                .ok()
                .and_then(|v| v.parse().ok()),
            mock: std::env::var("LOGITPROBE_MOCK")
                .ok()
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            no_cache: std::env::var("LOGITPROBE_NO_CACHE")
                .ok()
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            provider_timeout_ms: std::env::var("LOGITPROBE_PROVIDER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20_000),
            transport_retry_budget: std::env::var("LOGITPROBE_TRANSPORT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0 && n <= 10)
                .unwrap_or(3),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig {
                b: 5000,
                trim: 0.2,
                stability_width: 0.20,
            },
            sampling: SamplingConfig {
                max_output_tokens: 256,
                max_prompt_chars: 8000,
            },
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and environment variables.
    /// Uses `LOGITPROBE_CONFIG` or defaults to `logitprobe.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var("LOGITPROBE_CONFIG").unwrap_or_else(|_| "logitprobe.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.runtime = RuntimeConfig::load_from_env();

        if !(0.0..1.0).contains(&config.estimator.trim) {
            tracing::warn!(
                "estimator.trim {} outside [0,1), estimator still applies the frozen \
                 single-min/single-max policy regardless of this value",
                config.estimator.trim
            );
        }
        if config.estimator.b == 0 {
            tracing::warn!("estimator.b is 0, clamping to 1");
            config.estimator.b = 1;
        }

        Ok(config)
    }
}
