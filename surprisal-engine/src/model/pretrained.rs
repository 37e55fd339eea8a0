//! Pretrained model files from the HuggingFace Hub
//!
//! A registry variant needs two files: its GGUF weights (from the family repo)
//! and `tokenizer.json` (from the tokenizer repo, which for converted GGUF
//! repos is usually the upstream model). Both are resolved against the local
//! HuggingFace cache and downloaded on a miss.
//!
//! Every lookup goes through a `fetch(repo_id, filename)` closure so the
//! registry mapping can be exercised without network access.

use std::path::PathBuf;

use hf_hub::api::sync::{Api, ApiBuilder};

use super::model_config::{ModelFamily, VariantConfig, registry};
use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local paths of a registry model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

/// Hub client shared by all downloads of a run.
///
/// Honors `HF_TOKEN` for gated or private repositories.
pub struct HubClient {
    api: Api,
}

impl HubClient {
    pub fn new() -> Result<Self> {
        let mut builder = ApiBuilder::new();
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder.build().map_err(|e| EvalError::Download(e.into()))?;
        Ok(Self { api })
    }

    /// Cached path of `filename` in `repo_id`, downloading it if needed.
    pub fn fetch(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        tracing::debug!("Resolving {} from {}", filename, repo_id);
        let path = self
            .api
            .model(repo_id.to_string())
            .get(filename)
            .map_err(|e| EvalError::Download(e.into()))?;
        tracing::debug!("{} -> {:?}", filename, path);
        Ok(path)
    }
}

fn lookup(variant_id: &str) -> Result<(&'static ModelFamily, &'static VariantConfig)> {
    registry()
        .find_variant(variant_id)
        .ok_or_else(|| EvalError::UnknownVariant(variant_id.to_string()))
}

/// Resolve both files of `variant_id` through `fetch`.
pub fn pretrained_files_with<F>(variant_id: &str, mut fetch: F) -> Result<PretrainedFiles>
where
    F: FnMut(&str, &str) -> Result<PathBuf>,
{
    let (family, variant) = lookup(variant_id)?;
    tracing::info!("Fetching pretrained {}", variant.display_name);
    Ok(PretrainedFiles {
        weights: fetch(&family.repo_id, &variant.filename)?,
        tokenizer: fetch(family.tokenizer_repo(), TOKENIZER_FILE)?,
    })
}

/// Resolve only the GGUF weights of `variant_id` through `fetch`.
pub fn pretrained_weights_with<F>(variant_id: &str, fetch: F) -> Result<PathBuf>
where
    F: FnOnce(&str, &str) -> Result<PathBuf>,
{
    let (family, variant) = lookup(variant_id)?;
    tracing::info!("Fetching pretrained weights {}", variant.display_name);
    fetch(&family.repo_id, &variant.filename)
}

/// Resolve only the tokenizer of `variant_id` through `fetch`.
pub fn pretrained_tokenizer_with<F>(variant_id: &str, fetch: F) -> Result<PathBuf>
where
    F: FnOnce(&str, &str) -> Result<PathBuf>,
{
    let (family, _) = lookup(variant_id)?;
    fetch(family.tokenizer_repo(), TOKENIZER_FILE)
}

/// Weights and tokenizer of `variant_id` from the Hub.
pub fn pretrained_files(variant_id: &str) -> Result<PretrainedFiles> {
    // Fail on an unknown id before touching the network
    lookup(variant_id)?;
    let hub = HubClient::new()?;
    pretrained_files_with(variant_id, |repo, file| hub.fetch(repo, file))
}

/// GGUF weights of `variant_id` from the Hub.
pub fn pretrained_weights(variant_id: &str) -> Result<PathBuf> {
    lookup(variant_id)?;
    let hub = HubClient::new()?;
    pretrained_weights_with(variant_id, |repo, file| hub.fetch(repo, file))
}

/// `tokenizer.json` of `variant_id` from the Hub.
pub fn pretrained_tokenizer(variant_id: &str) -> Result<PathBuf> {
    lookup(variant_id)?;
    let hub = HubClient::new()?;
    pretrained_tokenizer_with(variant_id, |repo, file| hub.fetch(repo, file))
}
