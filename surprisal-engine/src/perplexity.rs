//! Corpus perplexity
//!
//! `perplexity = exp(total_surprisal / total_words)`, where the total sums the
//! NLL of every token that has a predecessor and the denominator counts
//! whitespace-delimited words rather than tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::model::{TokenId, Tokenizer};
use crate::surprisal::{nats_to_bits, sentence_words};
type Result<T> = crate::error::Result<T>;

/// Units of the per-token surprisal summed into the perplexity numerator
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerplexityUnits {
    /// Raw natural-log NLL as returned by the model
    #[default]
    Nats,
    /// NLL converted to bits before summing (legacy evaluation script behaviour)
    Bits,
}

impl FromStr for PerplexityUnits {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nats" => Ok(PerplexityUnits::Nats),
            "bits" => Ok(PerplexityUnits::Bits),
            other => Err(EvalError::Config(format!(
                "unknown perplexity units '{}' (expected nats or bits)",
                other
            ))),
        }
    }
}

impl fmt::Display for PerplexityUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerplexityUnits::Nats => f.write_str("nats"),
            PerplexityUnits::Bits => f.write_str("bits"),
        }
    }
}

/// Final corpus statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerplexityResult {
    pub perplexity: f64,
    pub total_surprisal: f64,
    pub total_words: usize,
    pub sentences: usize,
    pub units: PerplexityUnits,
}

/// Running totals over the sentences scored so far
#[derive(Debug, Clone, Default)]
pub struct PerplexityAccumulator {
    units: PerplexityUnits,
    total_surprisal: f64,
    total_words: usize,
    sentences: usize,
}

impl PerplexityAccumulator {
    pub fn new(units: PerplexityUnits) -> Self {
        Self {
            units,
            ..Default::default()
        }
    }

    /// Add a sentence with `n_words` words and its per-token NLL row.
    ///
    /// The row holds one value per token after the first, so every entry
    /// contributes.
    pub fn add(&mut self, n_words: usize, nll: &[f32]) {
        self.total_words += n_words;
        self.sentences += 1;
        for &v in nll {
            let v = f64::from(v);
            self.total_surprisal += match self.units {
                PerplexityUnits::Nats => v,
                PerplexityUnits::Bits => nats_to_bits(v),
            };
        }
    }

    /// Decode `tokens` to count words, then add the sentence.
    pub fn add_sentence<T: Tokenizer + ?Sized>(
        &mut self,
        tokenizer: &T,
        sentence_id: usize,
        tokens: &[TokenId],
        nll: &[f32],
    ) -> Result<()> {
        let expected = tokens.len().saturating_sub(1);
        if nll.len() != expected {
            return Err(EvalError::ScoreLength {
                sentence: sentence_id,
                expected,
                found: nll.len(),
            });
        }
        let n_words = sentence_words(tokenizer, tokens)?.len();
        self.add(n_words, nll);
        Ok(())
    }

    pub fn total_words(&self) -> usize {
        self.total_words
    }

    pub fn total_surprisal(&self) -> f64 {
        self.total_surprisal
    }

    pub fn sentences(&self) -> usize {
        self.sentences
    }

    /// Compute the perplexity. Fails on a corpus without words.
    pub fn finish(&self) -> Result<PerplexityResult> {
        if self.total_words == 0 {
            return Err(EvalError::EmptyCorpus);
        }
        Ok(PerplexityResult {
            perplexity: (self.total_surprisal / self.total_words as f64).exp(),
            total_surprisal: self.total_surprisal,
            total_words: self.total_words,
            sentences: self.sentences,
            units: self.units,
        })
    }
}
