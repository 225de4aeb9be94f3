//! CLI wrapper over the measurement core's `run()` entrypoint. This is
//! a convenience binary for local/manual use, not the HTTP/API layer that
//! owns auth, billing, and usage metering.

use clap::Parser;
use logitprobe::config::Config;
use logitprobe::run::{self, RunConfig};
use logitprobe::{LogitProbeError, load_env};

#[derive(Parser, Debug)]
#[command(name = "logitprobe", about = "Measure an LLM's belief probability in a claim")]
struct Args {
    /// The factual claim to evaluate.
    #[arg(long)]
    claim: String,

    /// Model identifier passed through to the provider adapter.
    #[arg(long)]
    model: String,

    /// Prompt bank version to load.
    #[arg(long, default_value = "v1")]
    prompt_version: String,

    /// Total sampling slots.
    #[arg(long, default_value_t = 8)]
    k: usize,

    /// Replicates per slot.
    #[arg(long, default_value_t = 1)]
    r: usize,

    /// Distinct templates to rotate across.
    #[arg(long, default_value_t = 8)]
    t: usize,

    /// Bootstrap resamples.
    #[arg(long)]
    b: Option<usize>,

    /// Fixed bootstrap seed override.
    #[arg(long)]
    seed: Option<u64>,

    /// Use the deterministic mock provider instead of a live one.
    #[arg(long, default_value_t = false)]
    mock: bool,

    /// Bypass the sample cache (forced refresh).
    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

#[tokio::main]
async fn main() {
    load_env();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "logitprobe=info".to_string()))
        .init();

    let args = Args::parse();

    let cfg = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let run_cfg = RunConfig {
        claim: args.claim,
        model: args.model,
        prompt_version: args.prompt_version,
        k: args.k,
        r: args.r,
        t: args.t,
        b: args.b.unwrap_or(cfg.estimator.b),
        max_output_tokens: cfg.sampling.max_output_tokens,
        max_prompt_chars: cfg.sampling.max_prompt_chars,
        seed: args.seed,
        mock: args.mock,
        no_cache: args.no_cache,
    };

    match run::run(run_cfg, &cfg).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap());
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("run failed: {e}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(err: &LogitProbeError) -> i32 {
    match err {
        LogitProbeError::NoValidSamples => 2,
        LogitProbeError::PromptTooLong { .. } => 3,
        LogitProbeError::PromptNotFound { .. } => 4,
        LogitProbeError::ProviderUnavailable { .. } => 5,
        LogitProbeError::StorageFailure { .. } => 6,
        _ => 1,
    }
}
