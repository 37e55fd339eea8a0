//! Evaluation dataset loading
//!
//! One input line becomes one [`Sentence`]. Lines keep their file order, and
//! empty lines are kept (tokenized as-is) so sentence ids always match line
//! numbers.

use std::path::Path;
use std::str::FromStr;

use encoding_rs::{DecoderResult, Encoding, UTF_8};
use unicode_normalization::UnicodeNormalization;

use crate::error::EvalError;
use crate::model::{TokenId, Tokenizer};
type Result<T> = crate::error::Result<T>;

/// Tokenized evaluation line. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    line: usize,
    tokens: Vec<TokenId>,
}

impl Sentence {
    /// `line` is the 1-based input line number.
    pub fn new(line: usize, tokens: Vec<TokenId>) -> Self {
        Self { line, tokens }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Text encoding of the evaluation file, resolved from a WHATWG label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding(&'static Encoding);

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding(UTF_8)
    }
}

impl TextEncoding {
    /// Canonical name, e.g. `UTF-8` or `windows-1252`
    pub fn label(&self) -> &'static str {
        self.0.name()
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.0
    }
}

impl FromStr for TextEncoding {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        Encoding::for_label_no_replacement(s.trim().as_bytes())
            .map(TextEncoding)
            .ok_or_else(|| EvalError::Config(format!("unknown encoding '{}'", s)))
    }
}

/// Options controlling how lines are read before tokenization
#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    pub encoding: TextEncoding,
    /// Apply NFKC normalization to each line
    pub normalize_nfkc: bool,
}

/// Read an evaluation file and tokenize each line.
pub fn load_eval_dataset<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    path: &Path,
    options: &LoadOptions,
) -> Result<Vec<Sentence>> {
    let bytes = std::fs::read(path).map_err(|e| EvalError::io(path, e))?;
    let text = decode_text(&bytes, path, options.encoding)?;

    let mut sentences = Vec::new();
    for (idx, line) in split_lines(&text).enumerate() {
        let line = line.trim_end();
        let tokens = if options.normalize_nfkc {
            let normalized: String = line.nfkc().collect();
            tokenizer.encode(&normalized)?
        } else {
            tokenizer.encode(line)?
        };
        sentences.push(Sentence::new(idx + 1, tokens));
    }

    let total_tokens: usize = sentences.iter().map(Sentence::len).sum();
    tracing::info!(
        "Loaded {} sentences ({} tokens) from {:?} ({})",
        sentences.len(),
        total_tokens,
        path,
        options.encoding.label()
    );
    Ok(sentences)
}

/// Decode the whole file, failing on the first malformed sequence.
///
/// A BOM is dropped only when it belongs to the configured encoding. The
/// error names the line holding the malformed bytes.
fn decode_text(bytes: &[u8], path: &Path, encoding: TextEncoding) -> Result<String> {
    let enc = encoding.encoding();
    let bytes = match Encoding::for_bom(bytes) {
        Some((bom_enc, bom_len)) if bom_enc == enc => &bytes[bom_len..],
        _ => bytes,
    };

    let malformed = |decoded: &str| EvalError::Encoding {
        path: path.to_path_buf(),
        line: decoded.matches('\n').count() + 1,
        encoding: enc.name().to_string(),
    };

    let mut decoder = enc.new_decoder_without_bom_handling();
    let capacity = decoder
        .max_utf8_buffer_length_without_replacement(bytes.len())
        .ok_or_else(|| EvalError::Config(format!("{:?} is too large to decode", path)))?;
    let mut text = String::with_capacity(capacity);
    let (result, _read) = decoder.decode_to_string_without_replacement(bytes, &mut text, true);
    match result {
        DecoderResult::InputEmpty => Ok(text),
        DecoderResult::Malformed(..) | DecoderResult::OutputFull => Err(malformed(&text)),
    }
}

/// Split decoded text into lines. A trailing newline does not start an extra
/// line; `\r\n` endings are handled by the caller's trailing-whitespace strip.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    (!text.is_empty())
        .then(|| body.split('\n'))
        .into_iter()
        .flatten()
}
