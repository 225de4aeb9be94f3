//! Prompt composer & fingerprint: builds the exact text sent to the
//! provider and computes `prompt_sha256` over it in a fixed canonical order.

use crate::error::{LogitProbeError, Result};
use crate::types::{ComposedPrompt, PromptBank};
use sha2::{Digest, Sha256};

/// Composes the instructions (system + schema) and user text for one
/// (paraphrase, claim) pair, enforcing `max_prompt_chars`.
pub fn compose(
    bank: &PromptBank,
    paraphrase_idx: usize,
    claim: &str,
    max_prompt_chars: usize,
) -> Result<ComposedPrompt> {
    let paraphrase = bank.paraphrases.get(paraphrase_idx).ok_or_else(|| {
        LogitProbeError::Internal {
            message: format!(
                "paraphrase_idx {paraphrase_idx} out of bounds for bank of size {}",
                bank.paraphrases.len()
            ),
        }
    })?;

    let instructions = format!("{}\n\n{}", bank.system_text, bank.schema_instructions);
    let user_text = bank
        .user_template
        .replace("{paraphrase}", &paraphrase.text)
        .replace("{claim}", claim);

    let total_len = instructions.chars().count() + user_text.chars().count();
    if total_len > max_prompt_chars {
        return Err(LogitProbeError::PromptTooLong {
            len: total_len,
            max: max_prompt_chars,
        });
    }

    let prompt_sha256 = fingerprint(&instructions, &user_text);

    Ok(ComposedPrompt {
        instructions,
        user_text,
        prompt_sha256,
    })
}

/// Fixed canonical order: instructions, a separator byte that cannot occur
/// in either field's text, then the user text.
fn fingerprint(instructions: &str, user_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instructions.as_bytes());
    hasher.update([0x01]);
    hasher.update(user_text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Paraphrase;

    fn bank() -> PromptBank {
        PromptBank {
            version: "v1".to_string(),
            system_text: "sys".to_string(),
            schema_instructions: "schema".to_string(),
            user_template: "{paraphrase} :: {claim}".to_string(),
            paraphrases: vec![
                Paraphrase {
                    text: "Is this true?".to_string(),
                },
                Paraphrase {
                    text: "Evaluate:".to_string(),
                },
            ],
        }
    }

    #[test]
    fn composes_and_fingerprints_deterministically() {
        let b = bank();
        let a = compose(&b, 0, "the sky is blue", 1000).unwrap();
        let c = compose(&b, 0, "the sky is blue", 1000).unwrap();
        assert_eq!(a.prompt_sha256, c.prompt_sha256);
        assert_eq!(a.prompt_sha256.len(), 64);
    }

    #[test]
    fn different_paraphrase_gives_different_fingerprint() {
        let b = bank();
        let a = compose(&b, 0, "the sky is blue", 1000).unwrap();
        let c = compose(&b, 1, "the sky is blue", 1000).unwrap();
        assert_ne!(a.prompt_sha256, c.prompt_sha256);
    }

    #[test]
    fn too_long_fails_fast() {
        let b = bank();
        let err = compose(&b, 0, "the sky is blue", 5).unwrap_err();
        assert!(matches!(err, LogitProbeError::PromptTooLong { .. }));
    }
}
