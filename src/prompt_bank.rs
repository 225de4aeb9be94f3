//! Prompt bank loader: reads a versioned prompt descriptor from a
//! TOML file and exposes it as a stable, never-mutated `PromptBank`.

use crate::error::{LogitProbeError, Result};
use crate::types::PromptBank;
use std::path::{Path, PathBuf};

/// Where to resolve a prompt bank from.
pub enum PromptSource {
    /// Resolve `<bank_dir>/<version>.toml`.
    Versioned(String),
    /// Load directly from this path; the file's declared `version` field
    /// still participates in cache identity.
    Direct(PathBuf),
}

/// Loads a [`PromptBank`] from disk, failing fast on a missing file or a
/// malformed descriptor.
pub fn load(source: PromptSource, bank_dir: &str) -> Result<PromptBank> {
    let path = match &source {
        PromptSource::Versioned(version) => Path::new(bank_dir).join(format!("{version}.toml")),
        PromptSource::Direct(path) => path.clone(),
    };

    let content = std::fs::read_to_string(&path).map_err(|_| LogitProbeError::PromptNotFound {
        version: match &source {
            PromptSource::Versioned(v) => v.clone(),
            PromptSource::Direct(p) => p.display().to_string(),
        },
    })?;

    let bank: PromptBank = toml::from_str(&content)?;
    validate(&bank)?;
    Ok(bank)
}

fn validate(bank: &PromptBank) -> Result<()> {
    if bank.version.trim().is_empty() {
        return Err(LogitProbeError::PromptMalformed {
            message: "prompt bank is missing a version".to_string(),
        });
    }
    if bank.paraphrases.is_empty() {
        return Err(LogitProbeError::PromptMalformed {
            message: "prompt bank has no paraphrases".to_string(),
        });
    }
    if !bank.user_template.contains("{paraphrase}") || !bank.user_template.contains("{claim}") {
        return Err(LogitProbeError::PromptMalformed {
            message: "user_template must contain {paraphrase} and {claim} placeholders"
                .to_string(),
        });
    }
    for (idx, p) in bank.paraphrases.iter().enumerate() {
        if p.text.trim().is_empty() {
            return Err(LogitProbeError::PromptMalformed {
                message: format!("paraphrase at index {idx} is empty"),
            });
        }
    }
    Ok(())
}
