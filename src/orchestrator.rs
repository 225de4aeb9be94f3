//! Run orchestrator: walks the sampling plan, coordinates cache and
//! provider calls under a bounded-parallel pipeline, filters for compliance,
//! and hands the collected samples to the estimator and stability modules.

use crate::cache::{BypassSampleCache, SampleCache, cache_key as build_cache_key};
use crate::compliance;
use crate::composer;
use crate::error::{LogitProbeError, Result};
use crate::estimator;
use crate::provider::{Provider, ProviderRequest};
use crate::sampler::{self, RotationKey};
use crate::seed;
use crate::stability;
use crate::types::{CompliantSample, EstimatorOutput, PromptBank, Sample, SamplingPlan, StabilityOutput};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The collaborators the orchestrator is handed by the top-level
/// initializer (no global state).
pub struct Collaborators {
    pub cache: Arc<dyn SampleCache>,
    pub provider: Arc<dyn Provider>,
}

pub struct RunInputs {
    pub claim: String,
    pub model: String,
    pub bank: PromptBank,
    pub k: usize,
    pub r: usize,
    pub t: usize,
    pub b: usize,
    pub max_output_tokens: u32,
    pub max_prompt_chars: usize,
    pub fixed_seed: Option<u64>,
    pub no_cache: bool,
    pub concurrency: usize,
    pub stability_width: f64,
}

pub struct OrchestrationResult {
    pub run_id: String,
    pub plan: SamplingPlan,
    pub samples: Vec<Sample>,
    pub estimator: EstimatorOutput,
    pub stability: StabilityOutput,
    pub is_stable: bool,
    pub bootstrap_seed: u64,
    pub rpl_compliance_rate: f64,
    pub cache_hit_rate: f64,
}

struct Tuple {
    /// Absolute index into the prompt bank's paraphrase list (0..T_bank),
    /// needed to compose the actual prompt text.
    bank_idx: usize,
    /// Position of `bank_idx` within this run's T selected templates
    /// (0..T), the value persisted as `Sample::paraphrase_idx`.
    template_position: usize,
    replicate_idx: usize,
}

/// Expands the sampler's length-K `seq` into K*R globally-unique tuples,
/// `replicate_idx = occurrence * R + r`.
fn expand_tuples(plan: &SamplingPlan, r: usize) -> Vec<Tuple> {
    let position_by_bank_idx: BTreeMap<usize, usize> = plan
        .tpl_indices
        .iter()
        .enumerate()
        .map(|(position, &bank_idx)| (bank_idx, position))
        .collect();

    let mut occurrence_counter: BTreeMap<usize, usize> = BTreeMap::new();
    let mut tuples = Vec::with_capacity(plan.seq.len() * r);
    for &bank_idx in &plan.seq {
        let occurrence = *occurrence_counter.entry(bank_idx).or_insert(0);
        occurrence_counter.insert(bank_idx, occurrence + 1);
        let template_position = position_by_bank_idx[&bank_idx];
        for rep in 0..r {
            tuples.push(Tuple {
                bank_idx,
                template_position,
                replicate_idx: occurrence * r + rep,
            });
        }
    }
    tuples
}

enum Attempt {
    Hit(Sample),
    Miss(Sample),
}

pub async fn run(collaborators: &Collaborators, inputs: RunInputs) -> Result<OrchestrationResult> {
    let run_id = uuid::Uuid::new_v4().to_string();

    let plan = sampler::build(
        &RotationKey {
            claim: &inputs.claim,
            model: &inputs.model,
            prompt_version: &inputs.bank.version,
        },
        inputs.bank.t_bank(),
        inputs.t,
        inputs.k,
    )?;

    let tuples = expand_tuples(&plan, inputs.r);

    // Identities are computed up front, independent of completion order.
    struct PreparedTuple {
        template_position: usize,
        replicate_idx: usize,
        instructions: String,
        user_text: String,
        prompt_sha256: String,
        cache_key: String,
    }

    let mut prepared = Vec::with_capacity(tuples.len());
    for t in tuples {
        let composed = composer::compose(
            &inputs.bank,
            t.bank_idx,
            &inputs.claim,
            inputs.max_prompt_chars,
        )?;
        let cache_key = build_cache_key(
            &inputs.claim,
            &inputs.model,
            &inputs.bank.version,
            &composed.prompt_sha256,
            t.replicate_idx,
            inputs.max_output_tokens,
        );
        prepared.push(PreparedTuple {
            template_position: t.template_position,
            replicate_idx: t.replicate_idx,
            instructions: composed.instructions,
            user_text: composed.user_text,
            prompt_sha256: composed.prompt_sha256,
            cache_key,
        });
    }

    let cache: Arc<dyn SampleCache> = if inputs.no_cache {
        Arc::new(BypassSampleCache::new(collaborators.cache.clone()))
    } else {
        collaborators.cache.clone()
    };
    let provider = collaborators.provider.clone();
    let run_id_for_closure = run_id.clone();
    let model = inputs.model.clone();
    let max_output_tokens = inputs.max_output_tokens;

    let attempts: Vec<Attempt> = stream::iter(prepared.into_iter())
        .map(move |pt| {
            let cache = cache.clone();
            let provider = provider.clone();
            let run_id = run_id_for_closure.clone();
            let model = model.clone();
            async move {
                if let Some(existing) = cache.get(&pt.cache_key)? {
                    return Ok::<_, LogitProbeError>(Attempt::Hit(existing));
                }

                let call_result = provider
                    .score_claim(ProviderRequest {
                        instructions: &pt.instructions,
                        user_text: &pt.user_text,
                        max_output_tokens,
                    })
                    .await?;

                let outcome = compliance::check(call_result.raw_json.as_ref());
                let sample = Sample {
                    cache_key: pt.cache_key.clone(),
                    run_id: run_id.clone(),
                    prompt_sha256: pt.prompt_sha256.clone(),
                    paraphrase_idx: pt.template_position,
                    replicate_idx: pt.replicate_idx,
                    prob_true: outcome.prob_true,
                    logit: outcome.logit,
                    provider_model_id: if call_result.provider_model_id.is_empty() {
                        model.clone()
                    } else {
                        call_result.provider_model_id
                    },
                    response_id: call_result.response_id,
                    latency_ms: call_result.latency_ms,
                    json_valid: call_result.json_valid && outcome.compliant,
                    created_at: Utc::now(),
                };
                cache.put(&sample)?;
                Ok(Attempt::Miss(sample))
            }
        })
        .buffer_unordered(inputs.concurrency.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let total = attempts.len();
    let mut cache_hits = 0usize;
    let mut samples = Vec::with_capacity(total);
    for a in attempts {
        match a {
            Attempt::Hit(s) => {
                cache_hits += 1;
                samples.push(s);
            }
            Attempt::Miss(s) => samples.push(s),
        }
    }

    let compliant_count = samples.iter().filter(|s| s.is_compliant()).count();
    let rpl_compliance_rate = if total > 0 {
        compliant_count as f64 / total as f64
    } else {
        0.0
    };
    let cache_hit_rate = if total > 0 {
        cache_hits as f64 / total as f64
    } else {
        0.0
    };

    // `paraphrase_idx` is already the run-local template position (0..T),
    // grouping compliant samples by template regardless of the bank's
    // absolute index or rotation offset.
    let compliant_samples: Vec<CompliantSample> = samples
        .iter()
        .filter(|s| s.is_compliant())
        .map(|s| CompliantSample {
            prompt_sha256_idx: s.paraphrase_idx,
            logit: s.logit.unwrap(),
        })
        .collect();

    let mut template_hashes: Vec<String> = samples
        .iter()
        .filter(|s| s.is_compliant())
        .map(|s| s.prompt_sha256.clone())
        .collect();
    template_hashes.sort_unstable();
    template_hashes.dedup();

    let derived_seed = seed::bootstrap_seed(
        &inputs.claim,
        &inputs.model,
        &inputs.bank.version,
        inputs.k,
        inputs.r,
        inputs.b,
        &template_hashes,
    );
    let bootstrap_seed = seed::resolve_seed(inputs.fixed_seed, derived_seed);

    let estimator_output = estimator::estimate(&compliant_samples, inputs.b, bootstrap_seed)?;
    let stability_output = stability::stability(estimator_output.template_iqr_logit);
    let is_stable = stability::is_stable(estimator_output.ci_width, inputs.stability_width);

    Ok(OrchestrationResult {
        run_id,
        plan,
        samples,
        estimator: estimator_output,
        stability: stability_output,
        is_stable,
        bootstrap_seed,
        rpl_compliance_rate,
        cache_hit_rate,
    })
}
