//! Deterministic sampler: given a rotation key and (T_bank, T, K), computes
//! a rotation offset and a balanced sequence of K template indices.

use crate::error::{LogitProbeError, Result};
use crate::types::SamplingPlan;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The rotation key is (claim, model, prompt_version); it alone determines
/// the offset, so the same claim against the same model/bank always rotates
/// to the same starting template.
pub struct RotationKey<'a> {
    pub claim: &'a str,
    pub model: &'a str,
    pub prompt_version: &'a str,
}

impl RotationKey<'_> {
    fn offset(&self, t_bank: usize) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(self.claim.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.model.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.prompt_version.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[0..8]);
        let n = u64::from_be_bytes(bytes);
        (n % t_bank as u64) as usize
    }
}

/// Builds the sampling plan: resolves the rotation offset, picks T distinct
/// templates starting there, and spreads K slots across them as evenly as
/// possible.
pub fn build(rotation_key: &RotationKey, t_bank: usize, t: usize, k: usize) -> Result<SamplingPlan> {
    if t_bank == 0 {
        return Err(LogitProbeError::InvalidParams {
            message: "t_bank must be > 0".to_string(),
        });
    }
    if t == 0 || t > t_bank {
        return Err(LogitProbeError::InvalidParams {
            message: format!("T must satisfy 1 <= T <= T_bank ({t_bank}), got {t}"),
        });
    }
    if k < t {
        return Err(LogitProbeError::InvalidParams {
            message: format!("K must be >= T ({t}), got {k}"),
        });
    }

    let rotation_offset = rotation_key.offset(t_bank);
    let tpl_indices: Vec<usize> = (0..t).map(|i| (rotation_offset + i) % t_bank).collect();

    let base = k / t;
    let remainder = k % t;

    let mut counts_by_template = BTreeMap::new();
    let mut seq = Vec::with_capacity(k);
    for (pos, &tpl) in tpl_indices.iter().enumerate() {
        let count = base + if pos < remainder { 1 } else { 0 };
        counts_by_template.insert(tpl, count);
        seq.extend(std::iter::repeat_n(tpl, count));
    }

    let imbalance_ratio = if remainder == 0 {
        1.0
    } else {
        (base + 1) as f64 / base as f64
    };

    Ok(SamplingPlan {
        t_bank,
        t,
        k,
        rotation_offset,
        tpl_indices,
        seq,
        counts_by_template,
        imbalance_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(claim: &'a str, model: &'a str, version: &'a str) -> RotationKey<'a> {
        RotationKey {
            claim,
            model,
            prompt_version: version,
        }
    }

    #[test]
    fn balanced_plan_k_equals_t() {
        let plan = build(&key("the sky is blue", "gpt", "v1"), 8, 8, 8).unwrap();
        assert_eq!(plan.seq.len(), 8);
        assert_eq!(plan.counts_by_template.values().copied().collect::<Vec<_>>(), vec![1; 8]);
        assert_eq!(plan.imbalance_ratio, 1.0);
        let distinct: std::collections::HashSet<_> = plan.seq.iter().collect();
        assert_eq!(distinct.len(), 8);
    }

    #[test]
    fn unbalanced_plan_k_12_t_8() {
        let plan = build(&key("the sky is blue", "gpt", "v1"), 8, 8, 12).unwrap();
        let mut counts: Vec<usize> = plan.counts_by_template.values().copied().collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(plan.imbalance_ratio, 2.0);
        assert_eq!(plan.seq.len(), 12);
    }

    #[test]
    fn rotation_differs_by_claim_same_length() {
        let plan_a = build(&key("claim A is true", "gpt", "v1"), 16, 5, 10).unwrap();
        let plan_b = build(&key("a wholly different claim", "gpt", "v1"), 16, 5, 10).unwrap();
        assert_eq!(plan_a.seq.len(), plan_b.seq.len());
        // Not guaranteed to differ for every pair of claims, but these two
        // hash to different offsets under SHA-256.
        assert_ne!(plan_a.tpl_indices, plan_b.tpl_indices);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let plan_a = build(&key("same claim", "gpt", "v1"), 10, 4, 9).unwrap();
        let plan_b = build(&key("same claim", "gpt", "v1"), 10, 4, 9).unwrap();
        assert_eq!(plan_a.seq, plan_b.seq);
        assert_eq!(plan_a.rotation_offset, plan_b.rotation_offset);
    }

    #[test]
    fn rejects_invalid_t() {
        assert!(build(&key("c", "m", "v1"), 4, 0, 4).is_err());
        assert!(build(&key("c", "m", "v1"), 4, 5, 5).is_err());
    }

    #[test]
    fn rejects_k_less_than_t() {
        assert!(build(&key("c", "m", "v1"), 8, 4, 2).is_err());
    }

    proptest::proptest! {
        #[test]
        fn per_template_counts_differ_by_at_most_one(t_bank in 1usize..20, t_off in 0usize..20, k_extra in 0usize..30) {
            let t_bank = t_bank;
            let t = 1 + (t_off % t_bank);
            let k = t + (k_extra % 50);
            let plan = build(&RotationKey { claim: "p", model: "m", prompt_version: "v1" }, t_bank, t, k).unwrap();
            let counts: Vec<usize> = plan.counts_by_template.values().copied().collect();
            let min = *counts.iter().min().unwrap();
            let max = *counts.iter().max().unwrap();
            proptest::prop_assert!(max - min <= 1);
            proptest::prop_assert_eq!(plan.seq.len(), k);
            proptest::prop_assert_eq!(plan.counts_by_template.len(), t);
            for idx in &plan.seq {
                proptest::prop_assert!(*idx < t_bank);
            }
        }
    }
}
