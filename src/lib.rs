//! `logitprobe` — a measurement core for estimating an LLM's belief
//! probability in a factual claim from many paraphrased, replicated
//! samples, aggregated into a calibrated probability via a logit-space
//! clustered bootstrap.

pub mod cache;
pub mod compliance;
pub mod composer;
pub mod config;
pub mod error;
pub mod estimator;
pub mod orchestrator;
pub mod persistence;
pub mod prompt_bank;
pub mod provider;
pub mod run;
pub mod sampler;
pub mod seed;
pub mod stability;
pub mod types;

pub use error::{LogitProbeError, Result};
pub use run::{RunConfig, RunResult, run};

/// Loads `.env` if present; silently ignored when missing.
pub fn load_env() {
    let _ = dotenvy::dotenv();
}
