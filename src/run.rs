//! The public run entrypoint: assembles collaborators once, drives the
//! orchestrator, and persists the result.

use crate::cache::SampleCache;
use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::{self, Collaborators, RunInputs};
use crate::persistence::{RunStore, SqliteRunStore};
use crate::prompt_bank::{self, PromptSource};
use crate::provider::{HttpProvider, MockProvider, Provider};
use crate::types::RunAggregateRow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything the caller supplies for one invocation.
pub struct RunConfig {
    pub claim: String,
    pub model: String,
    pub prompt_version: String,
    pub k: usize,
    pub r: usize,
    pub t: usize,
    pub b: usize,
    pub max_output_tokens: u32,
    pub max_prompt_chars: usize,
    pub seed: Option<u64>,
    pub mock: bool,
    pub no_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregates {
    pub prob_true_rpl: f64,
    pub ci95: [f64; 2],
    pub ci_width: f64,
    pub stability_score: f64,
    pub template_iqr_logit: f64,
    pub is_stable: bool,
    pub rpl_compliance_rate: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationDiagnostics {
    pub method: String,
    pub b: usize,
    pub center: String,
    pub trim: f64,
    pub bootstrap_seed: u64,
    pub n_templates: usize,
    pub counts_by_template: std::collections::BTreeMap<usize, usize>,
    pub imbalance_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingDiagnostics {
    pub k: usize,
    pub r: usize,
    pub t: usize,
    pub t_bank: usize,
    pub rotation_offset: usize,
    pub tpl_indices: Vec<usize>,
    pub seq: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub execution_id: String,
    pub claim: String,
    pub model: String,
    pub prompt_version: String,
    pub aggregates: Aggregates,
    pub aggregation: AggregationDiagnostics,
    pub sampling: SamplingDiagnostics,
    pub persistence_error: Option<String>,
}

/// Top-level initializer: constructs the collaborators for one invocation.
/// Not cached or shared as global state — call once per process, or
/// once per invocation from the CLI wrapper.
pub fn build_collaborators(cfg: &Config, model: &str) -> Result<(Collaborators, Arc<SqliteRunStore>)> {
    let store = Arc::new(SqliteRunStore::open(&cfg.runtime.storage_path)?);

    let provider: Arc<dyn Provider> = if cfg.runtime.mock {
        Arc::new(MockProvider::new(model.to_string()))
    } else {
        let api_key = cfg.runtime.provider_api_key.clone().unwrap_or_default();
        Arc::new(HttpProvider::new(
            "https://api.provider.example/v1/score_claim".to_string(),
            api_key,
            model.to_string(),
            cfg.runtime.provider_timeout_ms,
            cfg.runtime.transport_retry_budget,
        )?)
    };

    let cache: Arc<dyn SampleCache> = store.clone();

    Ok((Collaborators { cache, provider }, store))
}

/// The library entrypoint: `run(config) -> RunResult`.
pub async fn run(config: RunConfig, cfg: &Config) -> Result<RunResult> {
    let bank = prompt_bank::load(
        PromptSource::Versioned(config.prompt_version.clone()),
        &cfg.runtime.bank_dir,
    )?;

    let mut effective_cfg = cfg.clone();
    effective_cfg.runtime.mock = config.mock;
    effective_cfg.runtime.no_cache = config.no_cache;
    if let Some(seed) = config.seed {
        effective_cfg.runtime.fixed_seed = Some(seed);
    }

    let (collaborators, store) = build_collaborators(&effective_cfg, &config.model)?;

    let inputs = RunInputs {
        claim: config.claim.clone(),
        model: config.model.clone(),
        bank,
        k: config.k,
        r: config.r,
        t: config.t,
        b: config.b,
        max_output_tokens: config.max_output_tokens,
        max_prompt_chars: config.max_prompt_chars,
        fixed_seed: config.seed,
        no_cache: config.no_cache,
        concurrency: effective_cfg.runtime.concurrency,
        stability_width: effective_cfg.estimator.stability_width,
    };

    let result = orchestrator::run(&collaborators, inputs).await?;

    let run_recipe_id = recipe_hash(
        &config.claim,
        &config.model,
        &config.prompt_version,
        config.k,
        config.r,
    );
    let execution_id = uuid::Uuid::new_v4().to_string();

    let config_json = serde_json::to_string(&effective_cfg)?;
    let sampling = SamplingDiagnostics {
        k: config.k,
        r: config.r,
        t: config.t,
        t_bank: result.plan.t_bank,
        rotation_offset: result.plan.rotation_offset,
        tpl_indices: result.plan.tpl_indices.clone(),
        seq: result.plan.seq.clone(),
    };
    let sampler_json = serde_json::to_string(&sampling)?;
    let counts_by_template_json = serde_json::to_string(&result.plan.counts_by_template)?;

    let row = RunAggregateRow {
        run_id: result.run_id.clone(),
        run_recipe_id,
        created_at: chrono::Utc::now(),
        claim: config.claim.clone(),
        model: config.model.clone(),
        prompt_version: config.prompt_version.clone(),
        k: config.k,
        r: config.r,
        t: config.t,
        b: config.b,
        seed: config.seed,
        bootstrap_seed: result.bootstrap_seed,
        prob_true_rpl: result.estimator.prob_true_rpl,
        ci_lo: result.estimator.ci_lo,
        ci_hi: result.estimator.ci_hi,
        ci_width: result.estimator.ci_width,
        template_iqr_logit: result.estimator.template_iqr_logit,
        stability_score: result.stability.stability_score,
        imbalance_ratio: result.plan.imbalance_ratio,
        rpl_compliance_rate: result.rpl_compliance_rate,
        cache_hit_rate: result.cache_hit_rate,
        config_json,
        sampler_json,
        counts_by_template_json,
        prompt_char_len_max: config.max_prompt_chars,
    };

    // Persistence failure after a successful aggregation still returns the
    // computed result; the caller sees the error via `persistence_error`.
    let persistence_error = match store.upsert_run(&row) {
        Ok(()) => match store.insert_samples(&result.samples) {
            Ok(()) => match store.append_execution(&execution_id, &row) {
                Ok(()) => None,
                Err(e) => Some(e.to_string()),
            },
            Err(e) => Some(e.to_string()),
        },
        Err(e) => Some(e.to_string()),
    };

    Ok(RunResult {
        run_id: result.run_id,
        execution_id,
        claim: config.claim,
        model: config.model,
        prompt_version: config.prompt_version,
        aggregates: Aggregates {
            prob_true_rpl: result.estimator.prob_true_rpl,
            ci95: [result.estimator.ci_lo, result.estimator.ci_hi],
            ci_width: result.estimator.ci_width,
            stability_score: result.stability.stability_score,
            template_iqr_logit: result.estimator.template_iqr_logit,
            is_stable: result.is_stable,
            rpl_compliance_rate: result.rpl_compliance_rate,
            cache_hit_rate: result.cache_hit_rate,
        },
        aggregation: AggregationDiagnostics {
            method: "equal_by_template_cluster_bootstrap_trimmed".to_string(),
            b: config.b,
            center: "trimmed".to_string(),
            trim: 0.2,
            bootstrap_seed: result.bootstrap_seed,
            n_templates: result.estimator.n_templates,
            counts_by_template: result.plan.counts_by_template.clone(),
            imbalance_ratio: result.plan.imbalance_ratio,
        },
        sampling,
        persistence_error,
    })
}

fn recipe_hash(claim: &str, model: &str, prompt_version: &str, k: usize, r: usize) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(claim.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(k.to_le_bytes());
    hasher.update(r.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_bank(dir: &std::path::Path) {
        let path = dir.join("v1.toml");
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(
            br#"
version = "v1"
system_text = "You are a careful fact-checker."
schema_instructions = "Respond with strict JSON: {\"prob_true\": <float>}."
user_template = "{paraphrase} Claim: {claim}"

[[paraphrases]]
text = "Is this true?"
[[paraphrases]]
text = "Evaluate this claim."
[[paraphrases]]
text = "Does the evidence support this?"
[[paraphrases]]
text = "Assess the claim."
"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn full_run_produces_well_formed_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        write_bank(dir.path());
        let storage = dir.path().join("run.sqlite3");

        let mut cfg = Config::default();
        cfg.runtime.bank_dir = dir.path().to_str().unwrap().to_string();
        cfg.runtime.storage_path = storage.to_str().unwrap().to_string();
        cfg.runtime.mock = true;

        let run_cfg = RunConfig {
            claim: "the sky is blue".to_string(),
            model: "mock-model".to_string(),
            prompt_version: "v1".to_string(),
            k: 4,
            r: 2,
            t: 4,
            b: 200,
            max_output_tokens: 64,
            max_prompt_chars: 4000,
            seed: Some(11),
            mock: true,
            no_cache: false,
        };

        let result = run(run_cfg, &cfg).await.unwrap();
        assert!(result.aggregates.ci_lo_le_hi());
        assert!(result.persistence_error.is_none());
    }

    trait CiOrdering {
        fn ci_lo_le_hi(&self) -> bool;
    }
    impl CiOrdering for Aggregates {
        fn ci_lo_le_hi(&self) -> bool {
            self.ci95[0] <= self.prob_true_rpl && self.prob_true_rpl <= self.ci95[1]
        }
    }
}
