//! Tokenizer adapters
//!
//! Two interchangeable implementations of [`Tokenizer`]:
//! - [`BpeTokenizer`] wraps a HuggingFace `tokenizer.json` (byte-level BPE for GPT-2 style models)
//! - [`DisabledTokenizer`] maps whitespace-separated words one-to-one onto a fixed vocabulary

use std::collections::HashMap;
use std::path::Path;

use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

/// Token id as produced by every tokenizer in this crate.
pub type TokenId = u32;

/// Text ↔ token id conversion consumed by the evaluator.
pub trait Tokenizer {
    /// Encode one line of text into token ids.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decode a token sequence back into text.
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Number of entries in the vocabulary.
    fn vocab_size(&self) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for Box<T> {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        (**self).encode(text)
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        (**self).decode(tokens)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// BPE tokenizer backed by a HuggingFace `tokenizer.json`.
pub struct BpeTokenizer {
    inner: tokenizers::Tokenizer,
}

impl BpeTokenizer {
    /// Load and configure a tokenizer from a `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut inner =
            tokenizers::Tokenizer::from_file(path.as_ref()).map_err(EvalError::TokenizerLoad)?;
        // Padding or truncation would change the scored sequence
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(EvalError::TokenizerLoad)?;
        Ok(Self { inner })
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(EvalError::Tokenize)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        self.inner
            .decode(tokens, false)
            .map_err(EvalError::Tokenize)
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Identity tokenizer over a fixed vocabulary.
///
/// Each whitespace-separated word of the input must be a vocabulary entry and
/// becomes exactly one token. Decoding joins entries with a single space.
#[derive(Debug, Clone)]
pub struct DisabledTokenizer {
    encoder: HashMap<String, TokenId>,
    decoder: HashMap<TokenId, String>,
}

impl DisabledTokenizer {
    /// Build from a `word → id` map.
    pub fn new(vocab: HashMap<String, TokenId>) -> Self {
        let decoder = vocab.iter().map(|(w, &id)| (id, w.clone())).collect();
        Self {
            encoder: vocab,
            decoder,
        }
    }

    /// Load a JSON object mapping each vocabulary entry to its id.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let vocab: HashMap<String, TokenId> =
            serde_json::from_str(&content).map_err(|e| EvalError::TokenizerLoad(e.into()))?;
        tracing::debug!("Loaded {} vocabulary entries from {:?}", vocab.len(), path);
        Ok(Self::new(vocab))
    }
}

impl Tokenizer for DisabledTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        text.split_whitespace()
            .map(|word| {
                self.encoder
                    .get(word)
                    .copied()
                    .ok_or_else(|| EvalError::UnknownToken(word.to_string()))
            })
            .collect()
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        let words = tokens
            .iter()
            .map(|id| {
                self.decoder
                    .get(id)
                    .map(String::as_str)
                    .ok_or(EvalError::UnknownTokenId(*id))
            })
            .collect::<Result<Vec<&str>>>()?;
        Ok(words.join(" "))
    }

    fn vocab_size(&self) -> usize {
        self.encoder.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn vocab() -> DisabledTokenizer {
        let map = [("the", 0), ("cat", 1), ("sat", 2)]
            .into_iter()
            .map(|(w, id)| (w.to_string(), id))
            .collect();
        DisabledTokenizer::new(map)
    }

    #[test]
    fn test_disabled_encode_decode() {
        let tok = vocab();
        let ids = tok.encode("the cat  sat").unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(tok.decode(&ids).unwrap(), "the cat sat");
        assert_eq!(tok.decode(&[1]).unwrap(), "cat");
    }

    #[test]
    fn test_disabled_empty_line() {
        let tok = vocab();
        assert!(tok.encode("").unwrap().is_empty());
        assert_eq!(tok.decode(&[]).unwrap(), "");
    }

    #[test]
    fn test_disabled_unknown_word() {
        let tok = vocab();
        let err = tok.encode("the dog").unwrap_err();
        assert!(matches!(err, EvalError::UnknownToken(ref w) if w == "dog"));
        assert!(matches!(
            tok.decode(&[7]).unwrap_err(),
            EvalError::UnknownTokenId(7)
        ));
    }

    #[test]
    fn test_disabled_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"a": 0, "b": 1}"#).unwrap();
        let tok = DisabledTokenizer::from_file(file.path()).unwrap();
        assert_eq!(tok.vocab_size(), 2);
        assert_eq!(tok.encode("b a").unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_disabled_from_bad_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(
            DisabledTokenizer::from_file(file.path()),
            Err(EvalError::TokenizerLoad(_))
        ));
    }

    /// Minimal word-level `tokenizer.json` that truncates to two tokens
    fn truncating_tokenizer_json() -> NamedTempFile {
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": {
                "direction": "Right",
                "max_length": 2,
                "strategy": "LongestFirst",
                "stride": 0
            },
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": { "[UNK]": 0, "the": 1, "cat": 2, "sat": 3 },
                "unk_token": "[UNK]"
            }
        });
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json.to_string()).unwrap();
        file
    }

    #[test]
    fn test_bpe_truncation_disabled() {
        let file = truncating_tokenizer_json();
        let tok = BpeTokenizer::from_file(file.path()).unwrap();
        assert_eq!(tok.vocab_size(), 4);
        assert_eq!(tok.encode("the cat sat").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bpe_missing_file() {
        assert!(BpeTokenizer::from_file("/nonexistent/tokenizer.json").is_err());
    }
}
