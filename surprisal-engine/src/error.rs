//! Error types for surprisal evaluation

use std::path::PathBuf;

/// Errors that can occur while loading a model or evaluating a dataset.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("unknown model variant: '{0}'")]
    UnknownVariant(String),

    #[error("download failed")]
    Download(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model load failed")]
    ModelLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenizer load failed")]
    TokenizerLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenization failed")]
    Tokenize(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("inference failed")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("no checkpoint found for '{0}'")]
    CheckpointNotFound(String),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: line {line} is not valid {encoding}")]
    Encoding {
        path: PathBuf,
        line: usize,
        encoding: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("token '{0}' is not in the vocabulary")]
    UnknownToken(String),

    #[error("token id {0} is out of vocabulary range")]
    UnknownTokenId(u32),

    #[error("model vocabulary size {model} does not match tokenizer vocabulary size {tokenizer}")]
    VocabMismatch { model: usize, tokenizer: usize },

    #[error("sentence {sentence} has {len} tokens, longer than the context window ({n_ctx})")]
    SentenceTooLong {
        sentence: usize,
        len: usize,
        n_ctx: usize,
    },

    #[error("score batch rows must have equal length (row 0 has {expected}, row {row} has {found})")]
    RaggedBatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("scorer returned {found} values for sentence {sentence}, expected {expected}")]
    ScoreLength {
        sentence: usize,
        expected: usize,
        found: usize,
    },

    #[error(
        "sentence {sentence}: token/word alignment failed after {consumed} of {expected} words ({detail})"
    )]
    Alignment {
        sentence: usize,
        consumed: usize,
        expected: usize,
        detail: String,
    },

    #[error("cannot compute perplexity over an empty corpus (0 words)")]
    EmptyCorpus,
}

impl EvalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EvalError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_message() {
        let err = EvalError::Alignment {
            sentence: 3,
            consumed: 1,
            expected: 2,
            detail: "ran out of tokens".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "sentence 3: token/word alignment failed after 1 of 2 words (ran out of tokens)"
        );
    }

    #[test]
    fn test_io_keeps_source() {
        use std::error::Error;
        let err = EvalError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/nope"));
        assert!(err.source().is_some());
    }
}
