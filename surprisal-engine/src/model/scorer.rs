//! Language model scoring interface

use super::tokenizer::TokenId;
use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

/// Next-token negative log-likelihood scorer.
///
/// `score` takes a batch of equal-length token sequences and returns, for each
/// row, `len - 1` natural-log negative log-probabilities: entry `i` is
/// `-ln P(tokens[i + 1] | tokens[..=i])`.
pub trait TokenScorer {
    /// Score a batch of equal-length sequences.
    fn score(&mut self, batch: &[Vec<TokenId>]) -> Result<Vec<Vec<f32>>>;

    /// Vocabulary size of the model's output layer.
    fn n_vocab(&self) -> usize;

    /// Maximum number of tokens the model can score in one sequence.
    fn n_ctx(&self) -> usize;
}

impl<S: TokenScorer + ?Sized> TokenScorer for Box<S> {
    fn score(&mut self, batch: &[Vec<TokenId>]) -> Result<Vec<Vec<f32>>> {
        (**self).score(batch)
    }

    fn n_vocab(&self) -> usize {
        (**self).n_vocab()
    }

    fn n_ctx(&self) -> usize {
        (**self).n_ctx()
    }
}

/// Check that every row of `batch` has the same length.
///
/// Returns that length (0 for an empty batch).
pub fn check_batch(batch: &[Vec<TokenId>]) -> Result<usize> {
    let Some(first) = batch.first() else {
        return Ok(0);
    };
    let expected = first.len();
    for (row, seq) in batch.iter().enumerate().skip(1) {
        if seq.len() != expected {
            return Err(EvalError::RaggedBatch {
                row,
                expected,
                found: seq.len(),
            });
        }
    }
    Ok(expected)
}

/// Numerically stable negative log-probability of `target` under `logits`.
///
/// Only the first `n_vocab` logits take part in the normalization.
pub fn nll_from_logits(logits: &[f32], target: usize, n_vocab: usize) -> f32 {
    let logits = &logits[..n_vocab.min(logits.len())];
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let log_sum_exp: f32 = logits
        .iter()
        .map(|&x| (x - max_logit).exp())
        .sum::<f32>()
        .ln()
        + max_logit;
    match logits.get(target) {
        Some(&logit) => log_sum_exp - logit,
        None => f32::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch_equal() {
        let batch = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(check_batch(&batch).unwrap(), 3);
        assert_eq!(check_batch(&[]).unwrap(), 0);
    }

    #[test]
    fn test_check_batch_ragged() {
        let batch = vec![vec![1, 2, 3], vec![4, 5]];
        assert!(matches!(
            check_batch(&batch),
            Err(EvalError::RaggedBatch {
                row: 1,
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_nll_uniform() {
        let logits = vec![0.0f32; 4];
        let nll = nll_from_logits(&logits, 2, 4);
        assert!((nll - 4.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_nll_ignores_padding_logits() {
        // Padded output layers can be wider than the vocabulary
        let logits = vec![0.0, 0.0, 100.0];
        let nll = nll_from_logits(&logits, 0, 2);
        assert!((nll - 2.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_nll_confident_prediction() {
        let logits = vec![20.0, 0.0, 0.0];
        assert!(nll_from_logits(&logits, 0, 3) < 1e-6);
        assert!(nll_from_logits(&logits, 1, 3) > 19.0);
        assert_eq!(nll_from_logits(&logits, 5, 3), f32::INFINITY);
    }
}
