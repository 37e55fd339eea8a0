//! Model and tokenizer adapters: llama.cpp scoring, HuggingFace tokenizers,
//! checkpoint resolution and the pretrained model registry

pub mod checkpoint;
pub mod llamacpp;
pub mod model_config;
pub mod pretrained;
pub mod scorer;
pub mod tokenizer;

pub use checkpoint::{RestoreFrom, latest_gguf, resolve_checkpoint, resolve_checkpoint_with};
pub use llamacpp::{LlamaCppModel, LlamaScorer};
pub use model_config::{ModelFamily, ModelRegistry, VariantConfig, registry};
pub use pretrained::{
    HubClient, PretrainedFiles, pretrained_files, pretrained_files_with, pretrained_tokenizer,
    pretrained_tokenizer_with, pretrained_weights, pretrained_weights_with,
};
pub use scorer::{TokenScorer, check_batch, nll_from_logits};
pub use tokenizer::{BpeTokenizer, DisabledTokenizer, TokenId, Tokenizer};
