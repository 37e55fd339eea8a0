//! llama.cpp based GGUF inference for next-token scoring
//!
//! The model weights are loaded once into a [`LlamaCppModel`]; a [`LlamaScorer`]
//! borrows them and keeps a single llama.cpp context alive for the whole run,
//! clearing the KV cache between sequences.

use super::scorer::{TokenScorer, check_batch, nll_from_logits};
use super::tokenizer::TokenId;
use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::token::LlamaToken;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend
fn get_backend() -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(EvalError::ModelLoad(
            format!("Failed to initialize llama.cpp backend: {}", e).into(),
        )),
    }
}

/// Reject a context window longer than the model was trained on.
///
/// Positions past `n_ctx_train` have no learned embedding, so scores there are
/// meaningless. A model reporting 0 has no recorded limit.
fn check_context_window(n_ctx: u32, n_ctx_train: u32) -> Result<()> {
    if n_ctx_train > 0 && n_ctx > n_ctx_train {
        return Err(EvalError::Config(format!(
            "n_ctx {} exceeds the model's training context of {} tokens",
            n_ctx, n_ctx_train
        )));
    }
    Ok(())
}

/// GGUF language model loaded through llama.cpp
pub struct LlamaCppModel {
    model: LlamaModel,
    n_ctx: u32,
    /// Number of threads for inference (0 = use llama.cpp default)
    n_threads: u32,
}

impl LlamaCppModel {
    /// Load a GGUF model with an explicit context window size.
    ///
    /// Runs on CPU only; GPT-2 style graphs have Metal issues.
    pub fn from_file<P: AsRef<Path>>(path: P, n_ctx: u32) -> Result<Self> {
        if n_ctx == 0 {
            return Err(EvalError::Config("n_ctx must be non-zero".to_string()));
        }
        let backend = get_backend()?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(0);

        tracing::info!("Loading GGUF model from {:?}", path.as_ref());
        let model = LlamaModel::load_from_file(backend, path.as_ref(), &model_params)
            .map_err(|e| EvalError::ModelLoad(e.into()))?;
        check_context_window(n_ctx, model.n_ctx_train())?;

        Ok(Self {
            model,
            n_ctx,
            n_threads: 0,
        })
    }

    /// Set the number of threads for inference.
    /// 0 means use llama.cpp default (typically all cores).
    pub fn set_n_threads(&mut self, n: u32) {
        self.n_threads = n;
    }

    /// Vocabulary size of the model's output layer
    pub fn n_vocab(&self) -> usize {
        self.model.n_vocab().max(0) as usize
    }

    /// Configured context window
    pub fn n_ctx(&self) -> usize {
        self.n_ctx as usize
    }

    /// Build LlamaContextParams sized for whole-sequence scoring
    fn context_params(&self) -> LlamaContextParams {
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_batch(self.n_ctx)
            .with_n_ubatch(self.n_ctx);
        if self.n_threads > 0 {
            params
                .with_n_threads(self.n_threads as i32)
                .with_n_threads_batch(self.n_threads as i32)
        } else {
            params
        }
    }

    /// Create a scorer holding one reusable context over this model.
    pub fn scorer(&self) -> Result<LlamaScorer<'_>> {
        LlamaScorer::new(self)
    }
}

/// Reusable NLL scorer that keeps a single llama.cpp context alive.
///
/// Creating a `LlamaContext` is expensive. This struct amortizes the cost by
/// creating one context and clearing the KV cache between sequences.
pub struct LlamaScorer<'a> {
    model: &'a LlamaCppModel,
    ctx: LlamaContext<'a>,
    vocab_size: usize,
    /// Last scored row, reused when a batch repeats the same sequence
    last: Option<(Vec<TokenId>, Vec<f32>)>,
}

impl<'a> LlamaScorer<'a> {
    /// Create a new scorer with a reusable context.
    pub fn new(model: &'a LlamaCppModel) -> Result<Self> {
        let backend = get_backend()?;

        let ctx = model
            .model
            .new_context(backend, model.context_params())
            .map_err(|e| EvalError::Inference(e.into()))?;

        Ok(Self {
            model,
            ctx,
            vocab_size: model.n_vocab(),
            last: None,
        })
    }

    /// Per-position next-token NLL for one sequence.
    fn score_sequence(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        if let Some((seq, nll)) = &self.last
            && seq.as_slice() == tokens
        {
            return Ok(nll.clone());
        }

        let n_tokens = tokens.len();
        if n_tokens < 2 {
            return Ok(Vec::new());
        }
        if n_tokens > self.model.n_ctx() {
            return Err(EvalError::Inference(
                format!(
                    "sequence of {} tokens exceeds n_ctx {}",
                    n_tokens,
                    self.model.n_ctx()
                )
                .into(),
            ));
        }

        let llama_tokens: Vec<LlamaToken> =
            tokens.iter().map(|&id| LlamaToken(id as i32)).collect();

        self.ctx.clear_kv_cache();

        let mut batch = LlamaBatch::new(n_tokens.max(512), 1);
        batch
            .add_sequence(&llama_tokens, 0, true)
            .map_err(|e| EvalError::Inference(e.into()))?;

        self.ctx
            .decode(&mut batch)
            .map_err(|e| EvalError::Inference(e.into()))?;

        let nll: Vec<f32> = (0..n_tokens - 1)
            .map(|pos| {
                let logits = self.ctx.get_logits_ith(pos as i32);
                nll_from_logits(logits, tokens[pos + 1] as usize, self.vocab_size)
            })
            .collect();

        self.last = Some((tokens.to_vec(), nll.clone()));
        Ok(nll)
    }
}

impl TokenScorer for LlamaScorer<'_> {
    fn score(&mut self, batch: &[Vec<TokenId>]) -> Result<Vec<Vec<f32>>> {
        check_batch(batch)?;
        batch.iter().map(|seq| self.score_sequence(seq)).collect()
    }

    fn n_vocab(&self) -> usize {
        self.vocab_size
    }

    fn n_ctx(&self) -> usize {
        self.model.n_ctx()
    }
}
