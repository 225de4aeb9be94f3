//! Persistence: idempotent writes of `runs` (upsert latest-per-recipe)
//! and `samples` (content-addressed, deduped), plus an optional append-only
//! `executions` row. Backed by an embedded rusqlite store — a single writer
//! guarded by a mutex, since writes only happen on the orchestrator's
//! aggregation thread after all samples are collected.

use crate::cache::SampleCache;
use crate::error::Result;
use crate::types::{RunAggregateRow, Sample};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

pub trait RunStore: Send + Sync {
    fn upsert_run(&self, row: &RunAggregateRow) -> Result<()>;
    fn insert_samples(&self, samples: &[Sample]) -> Result<()>;
    fn append_execution(&self, execution_id: &str, run: &RunAggregateRow) -> Result<()>;
    fn get_sample(&self, cache_key: &str) -> Result<Option<Sample>>;
}

pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                run_recipe_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                claim TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                k INTEGER NOT NULL,
                r INTEGER NOT NULL,
                t INTEGER NOT NULL,
                b INTEGER NOT NULL,
                seed INTEGER,
                bootstrap_seed INTEGER NOT NULL,
                prob_true_rpl REAL NOT NULL,
                ci_lo REAL NOT NULL,
                ci_hi REAL NOT NULL,
                ci_width REAL NOT NULL,
                template_iqr_logit REAL NOT NULL,
                stability_score REAL NOT NULL,
                imbalance_ratio REAL NOT NULL,
                rpl_compliance_rate REAL NOT NULL,
                cache_hit_rate REAL NOT NULL,
                config_json TEXT NOT NULL,
                sampler_json TEXT NOT NULL,
                counts_by_template_json TEXT NOT NULL,
                prompt_char_len_max INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_recipe ON runs(run_recipe_id);
            CREATE INDEX IF NOT EXISTS idx_runs_version_model ON runs(prompt_version, model);

            CREATE TABLE IF NOT EXISTS samples (
                cache_key TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                prompt_sha256 TEXT NOT NULL,
                paraphrase_idx INTEGER NOT NULL,
                replicate_idx INTEGER NOT NULL,
                prob_true REAL,
                logit REAL,
                provider_model_id TEXT NOT NULL,
                response_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                json_valid INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_run_id ON samples(run_id);

            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                snapshot_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl RunStore for SqliteRunStore {
    fn upsert_run(&self, row: &RunAggregateRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO runs (
                run_id, run_recipe_id, created_at, claim, model, prompt_version,
                k, r, t, b, seed, bootstrap_seed, prob_true_rpl, ci_lo, ci_hi,
                ci_width, template_iqr_logit, stability_score, imbalance_ratio,
                rpl_compliance_rate, cache_hit_rate, config_json, sampler_json,
                counts_by_template_json, prompt_char_len_max
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25
            )
            ON CONFLICT(run_recipe_id) DO UPDATE SET
                run_id = excluded.run_id,
                created_at = excluded.created_at,
                k = excluded.k, r = excluded.r, t = excluded.t, b = excluded.b,
                seed = excluded.seed, bootstrap_seed = excluded.bootstrap_seed,
                prob_true_rpl = excluded.prob_true_rpl,
                ci_lo = excluded.ci_lo, ci_hi = excluded.ci_hi,
                ci_width = excluded.ci_width,
                template_iqr_logit = excluded.template_iqr_logit,
                stability_score = excluded.stability_score,
                imbalance_ratio = excluded.imbalance_ratio,
                rpl_compliance_rate = excluded.rpl_compliance_rate,
                cache_hit_rate = excluded.cache_hit_rate,
                config_json = excluded.config_json,
                sampler_json = excluded.sampler_json,
                counts_by_template_json = excluded.counts_by_template_json,
                prompt_char_len_max = excluded.prompt_char_len_max
            "#,
            params![
                row.run_id,
                row.run_recipe_id,
                row.created_at.to_rfc3339(),
                row.claim,
                row.model,
                row.prompt_version,
                row.k as i64,
                row.r as i64,
                row.t as i64,
                row.b as i64,
                row.seed.map(|s| s as i64),
                row.bootstrap_seed as i64,
                row.prob_true_rpl,
                row.ci_lo,
                row.ci_hi,
                row.ci_width,
                row.template_iqr_logit,
                row.stability_score,
                row.imbalance_ratio,
                row.rpl_compliance_rate,
                row.cache_hit_rate,
                row.config_json,
                row.sampler_json,
                row.counts_by_template_json,
                row.prompt_char_len_max as i64,
            ],
        )?;
        Ok(())
    }

    fn insert_samples(&self, samples: &[Sample]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for s in samples {
            conn.execute(
                r#"
                INSERT INTO samples (
                    cache_key, run_id, prompt_sha256, paraphrase_idx, replicate_idx,
                    prob_true, logit, provider_model_id, response_id, created_at,
                    latency_ms, json_valid
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(cache_key) DO UPDATE SET run_id = excluded.run_id
                "#,
                params![
                    s.cache_key,
                    s.run_id,
                    s.prompt_sha256,
                    s.paraphrase_idx as i64,
                    s.replicate_idx as i64,
                    s.prob_true,
                    s.logit,
                    s.provider_model_id,
                    s.response_id,
                    s.created_at.to_rfc3339(),
                    s.latency_ms as i64,
                    s.json_valid as i64,
                ],
            )?;
        }
        Ok(())
    }

    fn append_execution(&self, execution_id: &str, run: &RunAggregateRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let snapshot = serde_json::to_string(run)?;
        conn.execute(
            "INSERT INTO executions (execution_id, run_id, created_at, snapshot_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                execution_id,
                run.run_id,
                chrono::Utc::now().to_rfc3339(),
                snapshot
            ],
        )?;
        Ok(())
    }

    fn get_sample(&self, cache_key: &str) -> Result<Option<Sample>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"SELECT cache_key, run_id, prompt_sha256, paraphrase_idx, replicate_idx,
                          prob_true, logit, provider_model_id, response_id, created_at,
                          latency_ms, json_valid
                   FROM samples WHERE cache_key = ?1"#,
                params![cache_key],
                |row| {
                    let created_at: String = row.get(9)?;
                    Ok(Sample {
                        cache_key: row.get(0)?,
                        run_id: row.get(1)?,
                        prompt_sha256: row.get(2)?,
                        paraphrase_idx: row.get::<_, i64>(3)? as usize,
                        replicate_idx: row.get::<_, i64>(4)? as usize,
                        prob_true: row.get(5)?,
                        logit: row.get(6)?,
                        provider_model_id: row.get(7)?,
                        response_id: row.get(8)?,
                        latency_ms: row.get::<_, i64>(10)? as u64,
                        json_valid: row.get::<_, i64>(11)? != 0,
                        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                            .map(|dt| dt.with_timezone(&chrono::Utc))
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

/// `SqliteRunStore` doubles as the production `SampleCache`: the `samples`
/// table *is* the content-addressed cache, so there is no separate cache
/// storage to keep in sync with persistence.
impl SampleCache for SqliteRunStore {
    fn get(&self, cache_key: &str) -> Result<Option<Sample>> {
        RunStore::get_sample(self, cache_key)
    }

    fn put(&self, sample: &Sample) -> Result<()> {
        self.insert_samples(std::slice::from_ref(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn run_row(run_id: &str, recipe: &str, prob: f64) -> RunAggregateRow {
        RunAggregateRow {
            run_id: run_id.to_string(),
            run_recipe_id: recipe.to_string(),
            created_at: Utc::now(),
            claim: "the sky is blue".to_string(),
            model: "model-x".to_string(),
            prompt_version: "v1".to_string(),
            k: 8,
            r: 2,
            t: 8,
            b: 1000,
            seed: None,
            bootstrap_seed: 42,
            prob_true_rpl: prob,
            ci_lo: prob - 0.1,
            ci_hi: prob + 0.1,
            ci_width: 0.2,
            template_iqr_logit: 0.0,
            stability_score: 1.0,
            imbalance_ratio: 1.0,
            rpl_compliance_rate: 1.0,
            cache_hit_rate: 0.0,
            config_json: "{}".to_string(),
            sampler_json: "{}".to_string(),
            counts_by_template_json: "{}".to_string(),
            prompt_char_len_max: 100,
        }
    }

    fn sample(cache_key: &str, run_id: &str) -> Sample {
        Sample {
            cache_key: cache_key.to_string(),
            run_id: run_id.to_string(),
            prompt_sha256: "hash".to_string(),
            paraphrase_idx: 0,
            replicate_idx: 0,
            prob_true: Some(0.5),
            logit: Some(0.0),
            provider_model_id: "model-x".to_string(),
            response_id: "resp".to_string(),
            latency_ms: 10,
            json_valid: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_run_replaces_latest_for_same_recipe() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.upsert_run(&run_row("run-1", "recipe-a", 0.5)).unwrap();
        store.upsert_run(&run_row("run-2", "recipe-a", 0.7)).unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let (run_id, prob): (String, f64) = conn
            .query_row(
                "SELECT run_id, prob_true_rpl FROM runs WHERE run_recipe_id = 'recipe-a'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(run_id, "run-2");
        assert_eq!(prob, 0.7);
    }

    #[test]
    fn samples_are_deduped_by_cache_key() {
        let store = SqliteRunStore::in_memory().unwrap();
        store.insert_samples(&[sample("ck-1", "run-1")]).unwrap();
        store.insert_samples(&[sample("ck-1", "run-2")]).unwrap();
        let got = store.get_sample("ck-1").unwrap().unwrap();
        assert_eq!(got.run_id, "run-2");
    }

    #[test]
    fn missing_sample_is_none() {
        let store = SqliteRunStore::in_memory().unwrap();
        assert!(store.get_sample("nope").unwrap().is_none());
    }
}
