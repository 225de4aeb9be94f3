//! Estimator: logit-space, equal-by-template, trimmed-mean center, cluster
//! bootstrap with B resamples.
//!
//! The trim policy is frozen: for all T >= 5 this drops exactly the single
//! min and single max template mean, never a wider symmetric trim. Do not
//! change this without bumping an estimator version — see DESIGN.md.

use crate::error::{LogitProbeError, Result};
use crate::types::{CompliantSample, EstimatorOutput};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Step 3: the frozen center function. `values` need not be sorted on entry.
fn center(values: &[f64]) -> f64 {
    if values.len() >= 5 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let trimmed = &sorted[1..sorted.len() - 1];
        trimmed.iter().sum::<f64>() / trimmed.len() as f64
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Linear-interpolated percentile over a pre-sorted slice (ties resolved by
/// interpolating between order statistics).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

fn iqr(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    percentile(&sorted, 0.75) - percentile(&sorted, 0.25)
}

/// Groups compliant samples by template and computes each template's mean
/// logit (step 2), keyed by the template's position in the observed set
/// (stable ordering so bootstrap resampling can index into it).
fn template_means(samples: &[CompliantSample]) -> BTreeMap<usize, Vec<f64>> {
    let mut grouped: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for s in samples {
        grouped.entry(s.prompt_sha256_idx).or_default().push(s.logit);
    }
    grouped
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Runs the full estimator: point estimate, 95% CI via cluster bootstrap,
/// and the raw per-template IQR used by the stability module.
pub fn estimate(samples: &[CompliantSample], b: usize, seed: u64) -> Result<EstimatorOutput> {
    if samples.is_empty() {
        return Err(LogitProbeError::NoValidSamples);
    }

    let grouped = template_means(samples);
    let template_ids: Vec<usize> = grouped.keys().copied().collect();
    let n_templates = template_ids.len();

    let observed_means: Vec<f64> = template_ids.iter().map(|t| mean(&grouped[t])).collect();
    let point_logit = center(&observed_means);
    let prob_true_rpl = sigmoid(point_logit);
    let template_iqr_logit = if observed_means.len() >= 2 {
        iqr(&observed_means)
    } else {
        0.0
    };

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut bootstrap_centers = Vec::with_capacity(b);
    for _ in 0..b {
        let mut drawn_means = Vec::with_capacity(n_templates);
        for _ in 0..n_templates {
            let tpl_pick = template_ids[rng.gen_range(0..n_templates)];
            let replicates = &grouped[&tpl_pick];
            let mut resample_sum = 0.0;
            for _ in 0..replicates.len() {
                let idx = rng.gen_range(0..replicates.len());
                resample_sum += replicates[idx];
            }
            drawn_means.push(resample_sum / replicates.len() as f64);
        }
        bootstrap_centers.push(center(&drawn_means));
    }
    bootstrap_centers.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let ci_lo_logit = percentile(&bootstrap_centers, 0.025);
    let ci_hi_logit = percentile(&bootstrap_centers, 0.975);
    let ci_lo = sigmoid(ci_lo_logit);
    let ci_hi = sigmoid(ci_hi_logit);
    let ci_width = ci_hi - ci_lo;

    Ok(EstimatorOutput {
        prob_true_rpl,
        ci_lo,
        ci_hi,
        ci_width,
        template_iqr_logit,
        n_templates,
    })
}
