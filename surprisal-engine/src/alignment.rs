//! Token-to-word alignment
//!
//! Subword tokens do not line up with whitespace-delimited words. The aligner
//! consumes one decoded token at a time, appends its whitespace-stripped text
//! to a buffer and closes a group as soon as the buffer equals the next
//! expected word. Token surprisal is summed per group along the way.
//!
//! ```text
//!            push(token)                   buffer == word
//! Accumulating ──────────▶ Accumulating ─────────────────▶ WordComplete
//!      ▲                                                        │
//!      └────────────────────────── push(token) ─────────────────┘
//! ```

use std::ops::Range;

use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

/// Aligner state after the last pushed token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignState {
    /// Buffer holds a proper prefix of the next word (possibly empty)
    Accumulating,
    /// The last token closed a word; buffer and surprisal were reset
    WordComplete,
}

/// A closed token group covering exactly one word
#[derive(Debug, Clone, PartialEq)]
pub struct WordGroup<'w> {
    /// 0-based index of the word in its sentence
    pub word_index: usize,
    pub word: &'w str,
    /// Summed surprisal of the group's tokens
    pub surprisal: f64,
    /// Token positions belonging to this group
    pub tokens: Range<usize>,
}

/// Incremental token → word grouping for one sentence.
#[derive(Debug)]
pub struct WordAligner<'w> {
    sentence: usize,
    words: &'w [&'w str],
    word_index: usize,
    token_concat: String,
    surprisal_sum: f64,
    group_start: usize,
    next_token: usize,
    state: AlignState,
}

impl<'w> WordAligner<'w> {
    /// `sentence` is the 1-based sentence id used in error reports.
    pub fn new(sentence: usize, words: &'w [&'w str]) -> Self {
        Self {
            sentence,
            words,
            word_index: 0,
            token_concat: String::new(),
            surprisal_sum: 0.0,
            group_start: 0,
            next_token: 0,
            state: AlignState::Accumulating,
        }
    }

    pub fn state(&self) -> AlignState {
        self.state
    }

    /// Number of words closed so far.
    pub fn words_done(&self) -> usize {
        self.word_index
    }

    /// Feed the next token's decoded text and its surprisal.
    ///
    /// `surprisal` is `None` for a token with no preceding context. Returns
    /// the closed group when this token completes a word.
    pub fn push(&mut self, token_text: &str, surprisal: Option<f64>) -> Result<Option<WordGroup<'w>>> {
        let Some(&expected) = self.words.get(self.word_index) else {
            return Err(self.failure(format!(
                "token {} ('{}') follows the last word",
                self.next_token, token_text
            )));
        };

        self.token_concat.push_str(token_text.trim());
        if let Some(s) = surprisal {
            self.surprisal_sum += s;
        }
        self.next_token += 1;

        if self.token_concat == expected {
            let group = WordGroup {
                word_index: self.word_index,
                word: expected,
                surprisal: self.surprisal_sum,
                tokens: self.group_start..self.next_token,
            };
            self.token_concat.clear();
            self.surprisal_sum = 0.0;
            self.group_start = self.next_token;
            self.word_index += 1;
            self.state = AlignState::WordComplete;
            return Ok(Some(group));
        }

        if !expected.starts_with(self.token_concat.as_str()) {
            return Err(self.failure(format!(
                "decoded text '{}' does not match word '{}'",
                self.token_concat, expected
            )));
        }

        self.state = AlignState::Accumulating;
        Ok(None)
    }

    /// Check that every word was closed.
    ///
    /// Returns the number of aligned words.
    pub fn finish(self) -> Result<usize> {
        if self.word_index != self.words.len() {
            let detail = if self.token_concat.is_empty() {
                "ran out of tokens".to_string()
            } else {
                format!("ran out of tokens with '{}' pending", self.token_concat)
            };
            return Err(self.failure(detail));
        }
        Ok(self.word_index)
    }

    fn failure(&self, detail: String) -> EvalError {
        EvalError::Alignment {
            sentence: self.sentence,
            consumed: self.word_index,
            expected: self.words.len(),
            detail,
        }
    }
}

/// Align decoded token texts against `words` and return every group.
///
/// `surprisals[t]` is the surprisal of token `t`, or `None` when it has none.
pub fn align_tokens<'w, S: AsRef<str>>(
    sentence: usize,
    words: &'w [&'w str],
    token_texts: &[S],
    surprisals: &[Option<f64>],
) -> Result<Vec<WordGroup<'w>>> {
    let mut aligner = WordAligner::new(sentence, words);
    let mut groups = Vec::with_capacity(words.len());
    for (t, text) in token_texts.iter().enumerate() {
        let s = surprisals.get(t).copied().flatten();
        if let Some(group) = aligner.push(text.as_ref(), s)? {
            groups.push(group);
        }
    }
    aligner.finish()?;
    Ok(groups)
}
