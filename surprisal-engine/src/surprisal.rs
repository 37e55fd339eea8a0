//! Word-level surprisal
//!
//! Converts a sentence's per-token NLL into one [`SurprisalRecord`] per word
//! and writes them as a tab-separated report:
//!
//! ```text
//! sentence_id	token_id	token	surprisal
//! 1	1	hi	0.0
//! 1	2	there	1.1541560327111708
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::alignment::WordAligner;
use crate::error::EvalError;
use crate::model::{TokenId, Tokenizer};
type Result<T> = crate::error::Result<T>;

/// Report header line (without newline)
pub const REPORT_HEADER: &str = "sentence_id\ttoken_id\ttoken\tsurprisal";

/// Convert a natural-log negative log-probability into bits.
///
/// Equal to `-log2(exp(-nll))` without the underflow of `exp` for large `nll`.
pub fn nats_to_bits(nll: f64) -> f64 {
    nll / std::f64::consts::LN_2
}

/// One report row
#[derive(Debug, Clone, PartialEq)]
pub struct SurprisalRecord {
    /// 1-based sentence id
    pub sentence_id: usize,
    /// 1-based word position within the sentence
    pub word_id: usize,
    pub word: String,
    /// Surprisal in bits
    pub surprisal: f64,
}

/// Decode a sentence and split it into words.
pub fn sentence_words<T: Tokenizer + ?Sized>(tokenizer: &T, tokens: &[TokenId]) -> Result<Vec<String>> {
    let text = tokenizer.decode(tokens)?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

/// Compute per-word surprisal for one sentence.
///
/// `nll[t - 1]` is the model's natural-log NLL of token `t`; token 0 has no
/// context and contributes nothing.
pub fn sentence_surprisals<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    sentence_id: usize,
    tokens: &[TokenId],
    nll: &[f32],
) -> Result<Vec<SurprisalRecord>> {
    let expected = tokens.len().saturating_sub(1);
    if nll.len() != expected {
        return Err(EvalError::ScoreLength {
            sentence: sentence_id,
            expected,
            found: nll.len(),
        });
    }

    let words = sentence_words(tokenizer, tokens)?;
    let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
    let mut aligner = WordAligner::new(sentence_id, &word_refs);
    let mut records = Vec::with_capacity(words.len());

    for (t, &token) in tokens.iter().enumerate() {
        let piece = tokenizer.decode(&[token])?;
        let surprisal = (t > 0).then(|| nats_to_bits(f64::from(nll[t - 1])));
        if let Some(group) = aligner.push(&piece, surprisal)? {
            records.push(SurprisalRecord {
                sentence_id,
                word_id: group.word_index + 1,
                word: group.word.to_string(),
                surprisal: group.surprisal,
            });
        }
    }
    aligner.finish()?;

    tracing::debug!("Sentence {}: {} words", sentence_id, records.len());
    Ok(records)
}

/// Streaming TSV writer for surprisal records
pub struct SurprisalWriter<W: Write> {
    writer: W,
    path: PathBuf,
    rows: usize,
}

impl SurprisalWriter<BufWriter<File>> {
    /// Create (truncate) the report file, creating parent directories as needed.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| EvalError::io(path, e))?;
        Self::with_path(BufWriter::new(file), path)
    }
}

impl<W: Write> SurprisalWriter<W> {
    /// Wrap any writer. The header is written immediately.
    pub fn new(writer: W) -> Result<Self> {
        Self::with_path(writer, Path::new("<report>"))
    }

    fn with_path(writer: W, path: &Path) -> Result<Self> {
        let mut this = Self {
            writer,
            path: path.to_path_buf(),
            rows: 0,
        };
        writeln!(this.writer, "{}", REPORT_HEADER).map_err(|e| this.io_error(e))?;
        Ok(this)
    }

    pub fn write_record(&mut self, record: &SurprisalRecord) -> Result<()> {
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{:?}",
            record.sentence_id, record.word_id, record.word, record.surprisal
        )
        .map_err(|e| self.io_error(e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all(&mut self, records: &[SurprisalRecord]) -> Result<()> {
        records.iter().try_for_each(|r| self.write_record(r))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.writer)
    }

    fn io_error(&self, source: std::io::Error) -> EvalError {
        EvalError::io(&self.path, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DisabledTokenizer;
    use std::collections::HashMap;

    fn tokenizer() -> DisabledTokenizer {
        let vocab: HashMap<String, TokenId> = ["the", "cat", "sat"]
            .iter()
            .enumerate()
            .map(|(i, w)| (w.to_string(), i as TokenId))
            .collect();
        DisabledTokenizer::new(vocab)
    }

    #[test]
    fn test_nats_to_bits() {
        assert_eq!(nats_to_bits(0.0), 0.0);
        assert!((nats_to_bits(std::f64::consts::LN_2) - 1.0).abs() < 1e-12);
        let literal = -(-0.3f64).exp().log2();
        assert!((nats_to_bits(0.3) - literal).abs() < 1e-12);
        // exp(-800) underflows to 0, the division does not
        assert!(nats_to_bits(800.0).is_finite());
    }

    #[test]
    fn test_first_word_has_no_context() {
        let tok = tokenizer();
        let records = sentence_surprisals(&tok, 1, &[0, 1, 2], &[1.0, 2.0]).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].surprisal, 0.0);
        assert!((records[1].surprisal - nats_to_bits(1.0)).abs() < 1e-12);
        assert!((records[2].surprisal - nats_to_bits(2.0)).abs() < 1e-12);
        assert_eq!(records[2].word_id, 3);
        assert_eq!(records[2].word, "sat");
    }

    #[test]
    fn test_score_length_checked() {
        let tok = tokenizer();
        let err = sentence_surprisals(&tok, 5, &[0, 1], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            EvalError::ScoreLength {
                sentence: 5,
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn test_empty_sentence_has_no_records() {
        let tok = tokenizer();
        assert!(sentence_surprisals(&tok, 1, &[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_writer_format() {
        let mut writer = SurprisalWriter::new(Vec::new()).unwrap();
        writer
            .write_all(&[
                SurprisalRecord {
                    sentence_id: 1,
                    word_id: 1,
                    word: "hi".to_string(),
                    surprisal: 0.0,
                },
                SurprisalRecord {
                    sentence_id: 1,
                    word_id: 2,
                    word: "there".to_string(),
                    surprisal: 1.5,
                },
            ])
            .unwrap();
        assert_eq!(writer.rows(), 2);
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            out,
            "sentence_id\ttoken_id\ttoken\tsurprisal\n1\t1\thi\t0.0\n1\t2\tthere\t1.5\n"
        );
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("surprisals.tsv");
        let writer = SurprisalWriter::create(&path).unwrap();
        assert_eq!(writer.path(), path.as_path());
        writer.into_inner().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", REPORT_HEADER));
    }
}
