//! TOML-based model configuration
//!
//! Pretrained GGUF models are defined in `models.toml` at the crate root.
//! This module deserializes that file and provides a global registry for lookup.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Top-level config parsed from `models.toml`
#[derive(Debug, Deserialize)]
pub struct ModelRegistry {
    /// Default variant id (e.g. "gpt2-117m-q8")
    pub default_model: String,
    /// Model families keyed by short name (e.g. "gpt2-117m")
    pub models: HashMap<String, ModelFamily>,
}

/// A model family (one HuggingFace repo, multiple quantisation variants)
#[derive(Debug, Deserialize)]
pub struct ModelFamily {
    pub repo_id: String,
    /// Repo holding `tokenizer.json` when it is not shipped next to the GGUF files
    #[serde(default)]
    pub tokenizer_repo_id: Option<String>,
    pub display_name: String,
    /// Quantisation variants keyed by short name (e.g. "q8", "f16")
    pub variants: HashMap<String, VariantConfig>,
}

impl ModelFamily {
    /// Repository to fetch `tokenizer.json` from.
    pub fn tokenizer_repo(&self) -> &str {
        self.tokenizer_repo_id.as_deref().unwrap_or(&self.repo_id)
    }
}

/// A single downloadable GGUF variant
#[derive(Debug, Deserialize)]
pub struct VariantConfig {
    /// Unique variant id (e.g. "gpt2-117m-q8")
    pub id: String,
    /// GGUF filename in the HuggingFace repo
    pub filename: String,
    /// Human-readable name for logs
    pub display_name: String,
}

static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

/// Return the global model registry, parsed once from the embedded `models.toml`.
pub fn registry() -> &'static ModelRegistry {
    REGISTRY.get_or_init(|| {
        let toml_str = include_str!("../../models.toml");
        toml::from_str(toml_str).expect("embedded models.toml must be valid")
    })
}

impl ModelRegistry {
    /// Look up a variant by its unique id (e.g. "gpt2-117m-q8").
    ///
    /// Returns `(family, variant)` if found.
    pub fn find_variant(&self, variant_id: &str) -> Option<(&ModelFamily, &VariantConfig)> {
        self.iter_variants().find(|(_, v)| v.id == variant_id)
    }

    /// Return the default `(family, variant)` pair.
    pub fn default_variant(&self) -> Option<(&ModelFamily, &VariantConfig)> {
        self.find_variant(&self.default_model)
    }

    /// All variant ids across every model family, sorted.
    pub fn all_variant_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.iter_variants().map(|(_, v)| v.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all `(family, variant)` pairs.
    pub fn iter_variants(&self) -> impl Iterator<Item = (&ModelFamily, &VariantConfig)> {
        self.models
            .values()
            .flat_map(|f| f.variants.values().map(move |v| (f, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry() {
        let reg = registry();
        assert_eq!(reg.default_model, "gpt2-117m-q8");
        assert_eq!(reg.models.len(), 2);
    }

    #[test]
    fn test_find_variant() {
        let (family, variant) = registry()
            .find_variant("gpt2-117m-q8")
            .expect("variant not found");
        assert_eq!(family.repo_id, "QuantFactory/gpt2-GGUF");
        assert_eq!(family.tokenizer_repo(), "openai-community/gpt2");
        assert_eq!(variant.filename, "gpt2.Q8_0.gguf");
    }

    #[test]
    fn test_default_variant() {
        let (_, variant) = registry().default_variant().expect("default not found");
        assert_eq!(variant.id, registry().default_model);
    }

    #[test]
    fn test_unknown_variant_returns_none() {
        assert!(registry().find_variant("nonexistent-model").is_none());
    }

    #[test]
    fn test_variant_ids_unique() {
        let ids = registry().all_variant_ids();
        let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len(), "Duplicate variant ids found");
        assert_eq!(ids.len(), registry().iter_variants().count());
    }

    #[test]
    fn test_tokenizer_repo_fallback() {
        let family: ModelFamily = toml::from_str(
            r#"
repo_id = "someone/model-GGUF"
display_name = "x"
[variants.q4]
id = "x-q4"
filename = "x.gguf"
display_name = "x q4"
"#,
        )
        .unwrap();
        assert_eq!(family.tokenizer_repo(), "someone/model-GGUF");
    }
}
