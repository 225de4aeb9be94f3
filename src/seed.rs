//! Seed derivation: a deterministic 64-bit bootstrap seed from the run
//! identity and the sorted unique set of observed template fingerprints.

use sha2::{Digest, Sha256};

/// Derives `bootstrap_seed`. `template_hashes` need not be pre-sorted or
/// de-duplicated; this function normalizes them so the result is invariant
/// to arrival order.
pub fn bootstrap_seed(
    claim: &str,
    model: &str,
    prompt_version: &str,
    k: usize,
    r: usize,
    b: usize,
    template_hashes: &[String],
) -> u64 {
    let mut sorted: Vec<&str> = template_hashes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(claim.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(k.to_le_bytes());
    hasher.update(r.to_le_bytes());
    hasher.update(b.to_le_bytes());
    hasher.update(b"trimmed\x000.2\0");
    for h in &sorted {
        hasher.update(h.as_bytes());
        hasher.update(b"\0");
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[24..32]);
    u64::from_be_bytes(bytes)
}

/// Resolves the final seed to drive the bootstrap RNG: an explicit fixed
/// seed (config or `LOGITPROBE_FIXED_SEED`) overrides the derived one.
pub fn resolve_seed(fixed_seed: Option<u64>, derived: u64) -> u64 {
    fixed_seed.unwrap_or(derived)
}
