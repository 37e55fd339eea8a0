//! Settings configuration
//!
//! Default values are defined in `config/default.toml`. A user file is merged
//! on top of them key by key, and the CLI applies its flags last.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{LoadOptions, TextEncoding};
use crate::error::EvalError;
use crate::evaluator::{EvalMode, EvalOptions};
use crate::model::{RestoreFrom, registry};
use crate::perplexity::PerplexityUnits;
type Result<T> = crate::error::Result<T>;

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub eval: EvalSettings,
    pub model: ModelSettings,
}

/// What to evaluate and where to write it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Evaluation text file, one sentence per line
    #[serde(default)]
    pub eval_dataset: Option<PathBuf>,
    /// Surprisal report output path
    #[serde(default)]
    pub fpath: Option<PathBuf>,
    pub val_batch_size: usize,
    pub just_ppl: bool,
    pub encoding: String,
    pub normalize_nfkc: bool,
    #[serde(default)]
    pub perplexity_units: PerplexityUnits,
    /// Optional JSON file for the perplexity result
    #[serde(default)]
    pub summary_json: Option<PathBuf>,
}

/// Which model and tokenizer to load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Registry variant id used for fresh weights and the tokenizer (defaults to registry default)
    #[serde(default)]
    pub model_name: Option<String>,
    pub restore_from: String,
    pub run_name: String,
    pub checkpoint_dir: PathBuf,
    /// Explicit GGUF file, bypassing checkpoint resolution
    #[serde(default)]
    pub gguf: Option<PathBuf>,
    /// Explicit tokenizer.json, bypassing the registry download
    #[serde(default)]
    pub tokenizer_json: Option<PathBuf>,
    pub bpe: bool,
    /// JSON vocabulary for the disabled tokenizer
    #[serde(default)]
    pub vocabulary: Option<PathBuf>,
    pub n_ctx: u32,
    pub n_threads: u32,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    Ok(base.try_into()?)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "surprisal", "surprisal")
}

impl Settings {
    /// Default user configuration file path.
    ///
    /// E.g. `~/.config/surprisal/config.toml` on Linux.
    pub fn config_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the default user configuration file, or the built-in defaults
    /// when it does not exist.
    pub fn load() -> Result<Self> {
        match Self::config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        parse_with_defaults(&content)
    }

    /// Check the settings before any model or dataset work.
    pub fn validate(&self) -> Result<()> {
        if self.eval.eval_dataset.is_none() {
            return Err(EvalError::Config("eval_dataset is required".to_string()));
        }
        if self.eval.val_batch_size == 0 {
            return Err(EvalError::Config(
                "val_batch_size must be at least 1".to_string(),
            ));
        }
        if !self.eval.just_ppl && self.eval.fpath.is_none() {
            return Err(EvalError::Config(
                "fpath is required to write surprisals (or set just_ppl)".to_string(),
            ));
        }
        if !self.model.bpe && self.model.vocabulary.is_none() {
            return Err(EvalError::Config(
                "vocabulary is required when bpe is disabled".to_string(),
            ));
        }
        if self.model.n_ctx == 0 {
            return Err(EvalError::Config("n_ctx must be at least 1".to_string()));
        }
        self.text_encoding()?;
        if let Some(name) = &self.model.model_name
            && registry().find_variant(name).is_none()
            && self.model.gguf.is_none()
        {
            return Err(EvalError::UnknownVariant(name.clone()));
        }
        Ok(())
    }

    pub fn mode(&self) -> EvalMode {
        EvalMode::from_just_ppl(self.eval.just_ppl)
    }

    pub fn text_encoding(&self) -> Result<TextEncoding> {
        self.eval.encoding.parse()
    }

    pub fn load_options(&self) -> Result<LoadOptions> {
        Ok(LoadOptions {
            encoding: self.text_encoding()?,
            normalize_nfkc: self.eval.normalize_nfkc,
        })
    }

    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            val_batch_size: self.eval.val_batch_size,
            perplexity_units: self.eval.perplexity_units,
        }
    }

    pub fn restore_from(&self) -> RestoreFrom {
        match self.model.restore_from.parse() {
            Ok(restore) => restore,
            Err(never) => match never {},
        }
    }

    /// Registry variant id: the configured one or the registry default.
    pub fn model_variant(&self) -> &str {
        self.model
            .model_name
            .as_deref()
            .unwrap_or(&registry().default_model)
    }
}
