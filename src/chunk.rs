//! Token-budget text chunker for embedding input.
//!
//! Splits source text into contiguous, non-overlapping pieces small enough
//! for one embedding call. Concatenating the pieces reproduces the input.
//!
//! # Algorithm
//!
//! 1. If the whole text fits the budget, it is a single chunk.
//! 2. Otherwise convert `budget_tokens` to a byte window using a
//!    4 bytes/token ratio.
//! 3. Cut the window at the last newline (or space) inside it, so lines stay
//!    intact where possible; fall back to a hard cut on a char boundary.
//! 4. Verify every piece with the configured [`TokenCounter`] against the hard
//!    ceiling. The byte heuristic undershoots on dense or non-ASCII text
//!    (CJK runs near one token per char, i.e. per three bytes), so the
//!    default verifier is [`Utf8Estimate`]. A piece above the ceiling is
//!    reported as [`Error::ChunkTooLarge`] instead of being sent.
//!
//! Whitespace-only input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use rootcause::chunk::Chunker;
//!
//! let chunker = Chunker::new(7000, 8192);
//! let pieces = chunker.split("public class A {}");
//! assert_eq!(pieces.len(), 1);
//! assert!(pieces[0].is_ok());
//! ```

use crate::error::{Error, Result};

/// Approximate bytes-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Default per-chunk budget, leaving headroom under the ceiling.
pub const DEFAULT_BUDGET_TOKENS: usize = 7000;
/// Provider's hard per-call limit.
pub const DEFAULT_CEILING_TOKENS: usize = 8192;

/// Counts tokens the way the embedding provider would.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Estimates tokens as `ceil(bytes / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteEstimate;

impl TokenCounter for ByteEstimate {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Estimates ASCII at 4 bytes/token and every other char as one full token.
/// Never below [`ByteEstimate`] for the same text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Estimate;

impl TokenCounter for Utf8Estimate {
    fn count(&self, text: &str) -> usize {
        let (ascii, other) = text.chars().fold((0usize, 0usize), |(a, o), c| {
            if c.is_ascii() {
                (a + 1, o)
            } else {
                (a, o + 1)
            }
        });
        ascii.div_ceil(CHARS_PER_TOKEN) + other
    }
}

pub struct Chunker {
    budget_tokens: usize,
    ceiling_tokens: usize,
    counter: Box<dyn TokenCounter>,
}

impl Chunker {
    /// Chunker that splits on the byte estimate and verifies with
    /// [`Utf8Estimate`].
    pub fn new(budget_tokens: usize, ceiling_tokens: usize) -> Self {
        Self::with_counter(budget_tokens, ceiling_tokens, Box::new(Utf8Estimate))
    }

    /// `counter` verifies pieces against the ceiling; splitting always uses
    /// [`ByteEstimate`].

    pub fn with_counter(
        budget_tokens: usize,
        ceiling_tokens: usize,
        counter: Box<dyn TokenCounter>,
    ) -> Self {
        Self {
            budget_tokens: budget_tokens.max(1),
            ceiling_tokens,
            counter,
        }
    }

    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    pub fn ceiling_tokens(&self) -> usize {
        self.ceiling_tokens
    }

    /// Split `text` into pieces, each either ready to embed or rejected
    /// with [`Error::ChunkTooLarge`].
    pub fn split<'a>(&self, text: &'a str) -> Vec<Result<&'a str>> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces = if ByteEstimate.count(text) <= self.budget_tokens {
            vec![text]
        } else {
            split_bytes(text, self.budget_tokens * CHARS_PER_TOKEN)
        };

        pieces
            .into_iter()
            .map(|piece| {
                let tokens = self.counter.count(piece);
                if tokens > self.ceiling_tokens {
                    Err(Error::ChunkTooLarge {
                        tokens,
                        ceiling: self.ceiling_tokens,
                    })
                } else {
                    Ok(piece)
                }
            })
            .collect()
    }
}

/// Cut `text` into contiguous pieces of at most `max_bytes` bytes.
fn split_bytes(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            pieces.push(remaining);
            break;
        }

        let window = snap_to_char_boundary(remaining, max_bytes);
        let cut = remaining[..window]
            .rfind('\n')
            .or_else(|| remaining[..window].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window);
        let cut = if cut == 0 {
            // A single char wider than the window still has to make progress.
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            cut
        };

        pieces.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }

    pieces
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
