//! Evaluation run orchestration
//!
//! Validates the model/tokenizer/dataset combination, then scores sentences
//! one at a time and hands each NLL row to either the surprisal report or the
//! perplexity accumulator. An [`Interrupt`] is polled between sentences; when
//! it fires the run stops cleanly and keeps everything completed so far.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::dataset::Sentence;
use crate::error::EvalError;
use crate::model::{TokenScorer, Tokenizer};
use crate::perplexity::{PerplexityAccumulator, PerplexityResult, PerplexityUnits};
use crate::surprisal::{SurprisalWriter, sentence_surprisals};
type Result<T> = crate::error::Result<T>;

/// Which report a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Per-word surprisal TSV
    Surprisal,
    /// Single corpus perplexity
    Perplexity,
}

impl EvalMode {
    pub fn from_just_ppl(just_ppl: bool) -> Self {
        if just_ppl {
            EvalMode::Perplexity
        } else {
            EvalMode::Surprisal
        }
    }
}

/// Knobs for a run
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Rows per scoring call; each row repeats the same sentence
    pub val_batch_size: usize,
    pub perplexity_units: PerplexityUnits,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            val_batch_size: 2,
            perplexity_units: PerplexityUnits::default(),
        }
    }
}

/// Cooperative cancellation flag shared with a signal handler
///
/// The flag is only honoured while an evaluation loop runs; the loop arms it
/// on entry and disarms it on exit. A signal handler calls [`Interrupt::request`]
/// and must abort by itself when the request is refused, since nothing else
/// polls the flag (e.g. during a model download).
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<InterruptState>);

#[derive(Debug, Default)]
struct InterruptState {
    armed: AtomicBool,
    triggered: AtomicBool,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag unconditionally.
    pub fn trigger(&self) {
        self.0.triggered.store(true, Ordering::SeqCst);
    }

    /// Set the flag if an evaluation loop is running.
    ///
    /// Returns `false` when nothing would observe it.
    pub fn request(&self) -> bool {
        if self.is_armed() {
            self.trigger();
            true
        } else {
            false
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.0.triggered.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.0.armed.load(Ordering::SeqCst)
    }

    /// Arm until the returned guard is dropped.
    fn arm(&self) -> ArmGuard {
        self.0.armed.store(true, Ordering::SeqCst);
        ArmGuard(self.clone())
    }
}

/// Disarms its [`Interrupt`] on drop, including on early error returns
struct ArmGuard(Interrupt);

impl Drop for ArmGuard {
    fn drop(&mut self) {
        self.0.0.armed.store(false, Ordering::SeqCst);
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Interrupted,
}

/// Outcome of a surprisal run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurprisalRun {
    pub status: RunStatus,
    /// Sentences fully written to the report
    pub sentences: usize,
    /// Report rows written
    pub words: usize,
}

/// Outcome of a perplexity run
#[derive(Debug, Clone, PartialEq)]
pub struct PerplexityRun {
    pub status: RunStatus,
    /// `None` only when interrupted before any word was counted
    pub result: Option<PerplexityResult>,
}

/// Drives a scorer over a dataset.
pub struct Evaluator<'a, S: TokenScorer + ?Sized, T: Tokenizer + ?Sized> {
    scorer: &'a mut S,
    tokenizer: &'a T,
    options: EvalOptions,
    interrupt: Interrupt,
    on_sentence: Option<Box<dyn FnMut(&Sentence) + 'a>>,
}

impl<'a, S: TokenScorer + ?Sized, T: Tokenizer + ?Sized> Evaluator<'a, S, T> {
    pub fn new(scorer: &'a mut S, tokenizer: &'a T, options: EvalOptions) -> Self {
        Self {
            scorer,
            tokenizer,
            options,
            interrupt: Interrupt::new(),
            on_sentence: None,
        }
    }

    /// Poll `interrupt` between sentences.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Call `f` after each sentence is processed.
    pub fn on_sentence(mut self, f: impl FnMut(&Sentence) + 'a) -> Self {
        self.on_sentence = Some(Box::new(f));
        self
    }

    /// Model-level checks that do not need the dataset.
    pub fn check_model(&self) -> Result<()> {
        if self.options.val_batch_size == 0 {
            return Err(EvalError::Config(
                "val_batch_size must be at least 1".to_string(),
            ));
        }
        let model = self.scorer.n_vocab();
        let tokenizer = self.tokenizer.vocab_size();
        if model != tokenizer {
            return Err(EvalError::VocabMismatch { model, tokenizer });
        }
        Ok(())
    }

    /// Every sentence must fit the model's context window.
    pub fn check_sentences(&self, sentences: &[Sentence]) -> Result<()> {
        let n_ctx = self.scorer.n_ctx();
        if let Some(s) = sentences.iter().find(|s| s.len() > n_ctx) {
            return Err(EvalError::SentenceTooLong {
                sentence: s.line(),
                len: s.len(),
                n_ctx,
            });
        }
        Ok(())
    }

    /// Run all configuration checks.
    pub fn validate(&self, sentences: &[Sentence]) -> Result<()> {
        self.check_model()?;
        self.check_sentences(sentences)
    }

    /// Score `sentence` and return the NLL row for its tokens.
    ///
    /// The scorer receives the sentence repeated `val_batch_size` times and
    /// only the first row is used.
    fn score_sentence(&mut self, sentence: &Sentence) -> Result<Vec<f32>> {
        if sentence.len() < 2 {
            return Ok(Vec::new());
        }
        let batch = vec![sentence.tokens().to_vec(); self.options.val_batch_size];
        let rows = self.scorer.score(&batch)?;
        let expected = sentence.len() - 1;
        let row = rows.into_iter().next().unwrap_or_default();
        if row.len() != expected {
            return Err(EvalError::ScoreLength {
                sentence: sentence.line(),
                expected,
                found: row.len(),
            });
        }
        Ok(row)
    }

    fn interrupted(&self, done: usize, total: usize) -> bool {
        if self.interrupt.is_triggered() {
            warn!("Interrupted after {} of {} sentences", done, total);
            return true;
        }
        false
    }

    fn sentence_done(&mut self, sentence: &Sentence) {
        if let Some(f) = self.on_sentence.as_mut() {
            f(sentence);
        }
    }

    /// Score every sentence and stream per-word surprisal into `writer`.
    ///
    /// Rows of completed sentences are always flushed, including on interrupt.
    pub fn write_surprisals<W: Write>(
        &mut self,
        sentences: &[Sentence],
        writer: &mut SurprisalWriter<W>,
    ) -> Result<SurprisalRun> {
        self.validate(sentences)?;
        info!("Get surprisals for {} sentences", sentences.len());
        let _armed = self.interrupt.arm();

        let mut status = RunStatus::Completed;
        let mut done = 0;
        for sentence in sentences {
            if self.interrupted(done, sentences.len()) {
                status = RunStatus::Interrupted;
                break;
            }
            let nll = self.score_sentence(sentence)?;
            let records = sentence_surprisals(self.tokenizer, sentence.line(), sentence.tokens(), &nll)?;
            writer.write_all(&records)?;
            done += 1;
            self.sentence_done(sentence);
        }
        writer.flush()?;

        info!(
            "Wrote {} rows for {} sentences to {:?}",
            writer.rows(),
            done,
            writer.path()
        );
        Ok(SurprisalRun {
            status,
            sentences: done,
            words: writer.rows(),
        })
    }

    /// Score every sentence and compute the corpus perplexity.
    ///
    /// On interrupt the perplexity of the sentences scored so far is returned.
    pub fn perplexity(&mut self, sentences: &[Sentence]) -> Result<PerplexityRun> {
        self.validate(sentences)?;
        info!(
            "Get perplexity for {} sentences ({})",
            sentences.len(),
            self.options.perplexity_units
        );
        let _armed = self.interrupt.arm();

        let mut acc = PerplexityAccumulator::new(self.options.perplexity_units);
        for sentence in sentences {
            if self.interrupted(acc.sentences(), sentences.len()) {
                let result = if acc.total_words() > 0 {
                    Some(acc.finish()?)
                } else {
                    None
                };
                return Ok(PerplexityRun {
                    status: RunStatus::Interrupted,
                    result,
                });
            }
            let nll = self.score_sentence(sentence)?;
            acc.add_sentence(self.tokenizer, sentence.line(), sentence.tokens(), &nll)?;
            self.sentence_done(sentence);
        }

        let result = acc.finish()?;
        debug!(
            "total_surprisal={} total_words={}",
            result.total_surprisal, result.total_words
        );
        info!("Perplexity: {}", result.perplexity);
        Ok(PerplexityRun {
            status: RunStatus::Completed,
            result: Some(result),
        })
    }
}
