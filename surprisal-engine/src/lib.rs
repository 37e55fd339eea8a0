pub mod alignment;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod perplexity;
pub mod surprisal;

pub use alignment::{AlignState, WordAligner, WordGroup, align_tokens};
pub use config::Settings;
pub use dataset::{LoadOptions, Sentence, TextEncoding, load_eval_dataset};
pub use error::{EvalError, Result};
pub use evaluator::{
    EvalMode, EvalOptions, Evaluator, Interrupt, PerplexityRun, RunStatus, SurprisalRun,
};
pub use model::{
    BpeTokenizer, DisabledTokenizer, LlamaCppModel, LlamaScorer, RestoreFrom, TokenId,
    TokenScorer, Tokenizer,
};
pub use perplexity::{PerplexityAccumulator, PerplexityResult, PerplexityUnits};
pub use surprisal::{
    REPORT_HEADER, SurprisalRecord, SurprisalWriter, nats_to_bits, sentence_surprisals,
    sentence_words,
};
