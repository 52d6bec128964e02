// ============================================================
// Layer 6 — Vocabulary
// ============================================================
// A vocabulary file holds one token per line; the line number is
// the token id. The first four lines are the reserved tokens
// PAD, GO, EOS and UNK, in that order.
//
// Text → ids goes through a HuggingFace WordLevel tokenizer with a
// Whitespace pre-tokenizer, built in memory from the file as
// tokenizer JSON, so no trainer types are involved. Unknown
// words map to UNK.
//
// ids → text is a plain table lookup joined with single spaces.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::{fs, path::Path, str::FromStr};
use tokenizers::Tokenizer;

use crate::domain::error::Seq2SeqError;
use crate::domain::example::UNK_ID;
use crate::domain::traits::TokenBridge;

const RESERVED_TOKENS: usize = 4;

pub struct Vocabulary {
    tokenizer: Tokenizer,
    /// id → token
    tokens:    Vec<String>,
}

impl Vocabulary {
    /// Load a vocabulary file (one token per line)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read vocabulary '{}'", path.display()))?;
        let tokens = text.lines().map(|line| line.trim().to_string()).collect();
        let vocab = Self::from_tokens(tokens)
            .with_context(|| format!("Invalid vocabulary '{}'", path.display()))?;
        tracing::debug!("Loaded {} tokens from '{}'", vocab.tokens.len(), path.display());
        Ok(vocab)
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        if tokens.len() < RESERVED_TOKENS {
            return Err(Seq2SeqError::Vocabulary(format!(
                "{} tokens given, the {RESERVED_TOKENS} reserved tokens are required",
                tokens.len()
            ))
            .into());
        }

        // First occurrence wins when a token is listed twice
        let mut vocab = Map::new();
        for (id, token) in tokens.iter().enumerate() {
            if !token.is_empty() && !vocab.contains_key(token) {
                vocab.insert(token.clone(), Value::from(id));
            }
        }
        let unk_token = &tokens[UNK_ID as usize];

        let tokenizer_json = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {
                "type": "Whitespace"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": unk_token
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string())
            .map_err(|e| anyhow::anyhow!("Cannot build tokenizer: {e}"))?;
        Ok(Self { tokenizer, tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenBridge for Vocabulary {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> String {
        let unk = &self.tokens[UNK_ID as usize];
        ids.iter()
            .map(|&id| self.tokens.get(id as usize).unwrap_or(unk).as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn vocab_size(&self) -> usize {
        self.tokens.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let tokens = ["_PAD", "_GO", "_EOS", "_UNK", "hello", "world"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        Vocabulary::from_tokens(tokens).unwrap()
    }

    #[test]
    fn test_encode_maps_unknown_words_to_unk() {
        let v = vocab();
        assert_eq!(v.encode("hello world").unwrap(), vec![4, 5]);
        assert_eq!(v.encode("hello there world").unwrap(), vec![4, UNK_ID, 5]);
        assert_eq!(v.encode("").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_punctuation_is_split_off() {
        let v = vocab();
        assert_eq!(v.encode("hello, world").unwrap(), vec![4, UNK_ID, 5]);
    }

    #[test]
    fn test_decode_joins_with_spaces() {
        let v = vocab();
        assert_eq!(v.decode(&[5, 4]), "world hello");
        assert_eq!(v.decode(&[4, 99]), "hello _UNK");
        assert_eq!(v.vocab_size(), 6);
    }

    #[test]
    fn test_reserved_tokens_required() {
        let tokens = vec!["_PAD".to_string(), "_GO".to_string()];
        assert!(Vocabulary::from_tokens(tokens).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab6.fr");
        fs::write(&path, "_PAD\n_GO\n_EOS\n_UNK\nbonjour\nmonde\n").unwrap();
        let v = Vocabulary::load(&path).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v.decode(&[4, 5]), "bonjour monde");
        assert!(Vocabulary::load(dir.path().join("missing")).is_err());
    }
}
