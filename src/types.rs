//! Shared data types for samples, plans, and run aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One paraphrase entry loaded from a prompt bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paraphrase {
    pub text: String,
}

/// A versioned prompt descriptor: system text, schema instructions, user
/// template, and the paraphrase bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBank {
    pub version: String,
    pub system_text: String,
    pub schema_instructions: String,
    /// Must contain the literal placeholder `{paraphrase}` and `{claim}`.
    pub user_template: String,
    pub paraphrases: Vec<Paraphrase>,
}

impl PromptBank {
    pub fn t_bank(&self) -> usize {
        self.paraphrases.len()
    }
}

/// The output of the deterministic sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingPlan {
    pub t_bank: usize,
    pub t: usize,
    pub k: usize,
    pub rotation_offset: usize,
    /// The T selected bank indices, in rotated order.
    pub tpl_indices: Vec<usize>,
    /// Length-K sequence of bank indices, one per slot.
    pub seq: Vec<usize>,
    /// Planned replicate count per bank index (only entries for selected templates).
    pub counts_by_template: BTreeMap<usize, usize>,
    pub imbalance_ratio: f64,
}

/// The exact text sent to the provider, plus its content fingerprint.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub instructions: String,
    pub user_text: String,
    pub prompt_sha256: String,
}

/// Raw result of a single provider call, before compliance filtering.
#[derive(Debug, Clone)]
pub struct ProviderCallResult {
    pub raw_json: Option<serde_json::Value>,
    pub provider_model_id: String,
    pub response_id: String,
    pub latency_ms: u64,
    pub json_valid: bool,
}

/// Outcome of the compliance filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceOutcome {
    pub prob_true: Option<f64>,
    pub logit: Option<f64>,
    pub compliant: bool,
}

/// One durable sample row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub cache_key: String,
    pub run_id: String,
    pub prompt_sha256: String,
    /// Position of this sample's template within the run's T selected
    /// templates (0..T), not the prompt bank's absolute paraphrase index.
    pub paraphrase_idx: usize,
    pub replicate_idx: usize,
    pub prob_true: Option<f64>,
    pub logit: Option<f64>,
    pub provider_model_id: String,
    pub response_id: String,
    pub latency_ms: u64,
    pub json_valid: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Sample {
    pub fn is_compliant(&self) -> bool {
        self.json_valid && self.prob_true.is_some() && self.logit.is_some()
    }
}

/// A sample that passed compliance, carrying only what the estimator needs.
#[derive(Debug, Clone, Copy)]
pub struct CompliantSample {
    pub prompt_sha256_idx: usize,
    pub logit: f64,
}

/// Output of the estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorOutput {
    pub prob_true_rpl: f64,
    pub ci_lo: f64,
    pub ci_hi: f64,
    pub ci_width: f64,
    pub template_iqr_logit: f64,
    pub n_templates: usize,
}

/// Output of the stability module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StabilityOutput {
    pub stability_score: f64,
    pub calibrated_stability_score: f64,
    pub band: StabilityBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityBand {
    High,
    Medium,
    Low,
}

/// Aggregate diagnostics and inputs persisted once per run recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAggregateRow {
    pub run_id: String,
    pub run_recipe_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub claim: String,
    pub model: String,
    pub prompt_version: String,
    pub k: usize,
    pub r: usize,
    pub t: usize,
    pub b: usize,
    pub seed: Option<u64>,
    pub bootstrap_seed: u64,
    pub prob_true_rpl: f64,
    pub ci_lo: f64,
    pub ci_hi: f64,
    pub ci_width: f64,
    pub template_iqr_logit: f64,
    pub stability_score: f64,
    pub imbalance_ratio: f64,
    pub rpl_compliance_rate: f64,
    pub cache_hit_rate: f64,
    pub config_json: String,
    pub sampler_json: String,
    pub counts_by_template_json: String,
    pub prompt_char_len_max: usize,
}
