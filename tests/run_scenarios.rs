//! End-to-end scenario tests for the measurement core's public `run()`
//! entrypoint: balanced and unbalanced sampling plans, cache determinism
//! and bypass, cross-claim invariant bounds, and missing-bank errors.

use logitprobe::config::Config;
use logitprobe::run::{self, RunConfig};
use std::io::Write;

fn write_bank(dir: &std::path::Path, n_paraphrases: usize) {
    let mut body = String::from(
        r#"
version = "v1"
system_text = "You are a careful fact-checker."
schema_instructions = "Respond with strict JSON: {\"prob_true\": <float>}."
user_template = "{paraphrase} Claim: {claim}"
"#,
    );
    for i in 0..n_paraphrases {
        body.push_str(&format!("\n[[paraphrases]]\ntext = \"paraphrase variant {i}\"\n"));
    }
    let mut f = std::fs::File::create(dir.join("v1.toml")).unwrap();
    f.write_all(body.as_bytes()).unwrap();
}

fn base_config(dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.runtime.bank_dir = dir.to_str().unwrap().to_string();
    cfg.runtime.storage_path = dir.join("store.sqlite3").to_str().unwrap().to_string();
    cfg.runtime.mock = true;
    cfg
}

#[tokio::test]
async fn balanced_plan_k8_t8() {
    let dir = tempfile::tempdir().unwrap();
    write_bank(dir.path(), 8);
    let cfg = base_config(dir.path());

    let run_cfg = RunConfig {
        claim: "water boils at 100C at sea level".to_string(),
        model: "mock-model".to_string(),
        prompt_version: "v1".to_string(),
        k: 8,
        r: 1,
        t: 8,
        b: 300,
        max_output_tokens: 64,
        max_prompt_chars: 4000,
        seed: Some(1),
        mock: true,
        no_cache: false,
    };

    let result = run::run(run_cfg, &cfg).await.unwrap();
    assert_eq!(result.aggregation.imbalance_ratio, 1.0);
    let mut counts: Vec<usize> = result.aggregation.counts_by_template.values().copied().collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1; 8]);
}

#[tokio::test]
async fn unbalanced_plan_k12_t8() {
    let dir = tempfile::tempdir().unwrap();
    write_bank(dir.path(), 8);
    let cfg = base_config(dir.path());

    let run_cfg = RunConfig {
        claim: "the moon is made of rock".to_string(),
        model: "mock-model".to_string(),
        prompt_version: "v1".to_string(),
        k: 12,
        r: 1,
        t: 8,
        b: 300,
        max_output_tokens: 64,
        max_prompt_chars: 4000,
        seed: Some(2),
        mock: true,
        no_cache: false,
    };

    let result = run::run(run_cfg, &cfg).await.unwrap();
    assert_eq!(result.aggregation.imbalance_ratio, 2.0);
    let mut counts: Vec<usize> = result.aggregation.counts_by_template.values().copied().collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 1, 1, 1, 2, 2, 2, 2]);
}

#[tokio::test]
async fn identical_config_is_deterministic_and_cache_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_bank(dir.path(), 6);
    let cfg = base_config(dir.path());

    let make_cfg = || RunConfig {
        claim: "copper conducts electricity".to_string(),
        model: "mock-model".to_string(),
        prompt_version: "v1".to_string(),
        k: 6,
        r: 2,
        t: 6,
        b: 500,
        max_output_tokens: 64,
        max_prompt_chars: 4000,
        seed: Some(42),
        mock: true,
        no_cache: false,
    };

    let first = run::run(make_cfg(), &cfg).await.unwrap();
    let second = run::run(make_cfg(), &cfg).await.unwrap();

    assert_eq!(first.aggregates.ci95, second.aggregates.ci95);
    assert_eq!(first.aggregates.prob_true_rpl, second.aggregates.prob_true_rpl);
    assert_eq!(second.aggregates.cache_hit_rate, 1.0);
    assert_eq!(first.aggregation.bootstrap_seed, second.aggregation.bootstrap_seed);
}

#[tokio::test]
async fn no_cache_flag_forces_full_miss_rate() {
    let dir = tempfile::tempdir().unwrap();
    write_bank(dir.path(), 6);
    let cfg = base_config(dir.path());

    let make_cfg = |no_cache: bool| RunConfig {
        claim: "aluminum is a metal".to_string(),
        model: "mock-model".to_string(),
        prompt_version: "v1".to_string(),
        k: 6,
        r: 1,
        t: 6,
        b: 200,
        max_output_tokens: 64,
        max_prompt_chars: 4000,
        seed: Some(9),
        mock: true,
        no_cache,
    };

    run::run(make_cfg(false), &cfg).await.unwrap();
    let second = run::run(make_cfg(true), &cfg).await.unwrap();
    assert_eq!(second.aggregates.cache_hit_rate, 0.0);
}

#[tokio::test]
async fn invariant_bounds_hold_across_multiple_claims() {
    let dir = tempfile::tempdir().unwrap();
    write_bank(dir.path(), 10);
    let cfg = base_config(dir.path());

    for (i, claim) in [
        "bees communicate via dance",
        "the great wall of china is visible from space",
        "humans have 206 bones as adults",
    ]
    .iter()
    .enumerate()
    {
        let run_cfg = RunConfig {
            claim: claim.to_string(),
            model: "mock-model".to_string(),
            prompt_version: "v1".to_string(),
            k: 10,
            r: 2,
            t: 10,
            b: 400,
            max_output_tokens: 64,
            max_prompt_chars: 4000,
            seed: Some(100 + i as u64),
            mock: true,
            no_cache: false,
        };
        let result = run::run(run_cfg, &cfg).await.unwrap();
        assert!(result.aggregates.ci95[0] <= result.aggregates.prob_true_rpl);
        assert!(result.aggregates.prob_true_rpl <= result.aggregates.ci95[1]);
        assert!(result.aggregates.ci_width > 0.0 && result.aggregates.ci_width <= 1.0);
        assert!((0.0..=1.0).contains(&result.aggregates.stability_score));
        assert!((0.0..=1.0).contains(&result.aggregates.rpl_compliance_rate));
    }
}

#[tokio::test]
async fn prompt_not_found_surfaces_correct_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = base_config(dir.path());

    let run_cfg = RunConfig {
        claim: "any claim".to_string(),
        model: "mock-model".to_string(),
        prompt_version: "does-not-exist".to_string(),
        k: 4,
        r: 1,
        t: 4,
        b: 100,
        max_output_tokens: 64,
        max_prompt_chars: 4000,
        seed: Some(1),
        mock: true,
        no_cache: false,
    };

    let err = run::run(run_cfg, &cfg).await.unwrap_err();
    assert!(matches!(err, logitprobe::LogitProbeError::PromptNotFound { .. }));
}
