//! Sample cache: content-addressed by
//! (claim, model, prompt_version, prompt_sha256, replicate_idx, max_output_tokens).
//! Cache hits do not re-run compliance; compliance is captured on the row at
//! capture time.

use crate::error::Result;
use crate::types::Sample;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// Builds the content-addressed `cache_key` for one (template occurrence,
/// replicate) slot.
pub fn cache_key(
    claim: &str,
    model: &str,
    prompt_version: &str,
    prompt_sha256: &str,
    replicate_idx: usize,
    max_output_tokens: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(claim.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt_sha256.as_bytes());
    hasher.update(b"\0");
    hasher.update(replicate_idx.to_le_bytes());
    hasher.update(max_output_tokens.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Content-addressed sample store. Implementations must not re-validate
/// compliance on `get` — the stored `json_valid`/`prob_true`/`logit` fields
/// are authoritative.
pub trait SampleCache: Send + Sync {
    fn get(&self, cache_key: &str) -> Result<Option<Sample>>;
    fn put(&self, sample: &Sample) -> Result<()>;
}

/// An in-process cache backed by a plain map, used by the persistence-less
/// code paths (tests, and as the building block the rusqlite-backed store
/// wraps at the table level). Guarded by a `Mutex` since the orchestrator
/// may drive lookups from multiple concurrent provider-call tasks.
#[derive(Default)]
pub struct InMemorySampleCache {
    rows: Mutex<std::collections::HashMap<String, Sample>>,
}

impl SampleCache for InMemorySampleCache {
    fn get(&self, cache_key: &str) -> Result<Option<Sample>> {
        Ok(self.rows.lock().unwrap().get(cache_key).cloned())
    }

    fn put(&self, sample: &Sample) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(sample.cache_key.clone(), sample.clone());
        Ok(())
    }
}

/// Forces a cache miss on every `get` (the `no_cache` bypass mode)
/// while still recording samples via `put` so the row exists for future runs.
pub struct BypassSampleCache<C: SampleCache> {
    inner: C,
}

impl<C: SampleCache> BypassSampleCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: SampleCache> SampleCache for BypassSampleCache<C> {
    fn get(&self, _cache_key: &str) -> Result<Option<Sample>> {
        Ok(None)
    }

    fn put(&self, sample: &Sample) -> Result<()> {
        self.inner.put(sample)
    }
}

impl<T: SampleCache + ?Sized> SampleCache for std::sync::Arc<T> {
    fn get(&self, cache_key: &str) -> Result<Option<Sample>> {
        (**self).get(cache_key)
    }

    fn put(&self, sample: &Sample) -> Result<()> {
        (**self).put(sample)
    }
}
