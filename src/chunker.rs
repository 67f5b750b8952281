//! Token-bounded structural chunking.
//!
//! The chunker walks a document's unit sequence in order, packing units into
//! chunks that stay at or under the token budget. Breaks land on structural
//! boundaries (end of heading section, paragraph, table, list) whenever
//! possible. A single unit that alone exceeds the budget is split at
//! sentence boundaries, then hard character cutoffs as a last resort, and
//! every chunk produced that way is flagged `force_split` for downstream
//! quality auditing.
//!
//! Overlap between consecutive chunks exists only on the forced-split path.
//! Structural breaks carry no overlap; boundary awareness is the primary
//! strategy and overlap is the fallback safety net.

use miette::Diagnostic;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::PipelineConfig;
use crate::document::{SourceSpan, StructuredDocument, Unit, UnitKind};
use crate::errors::{Classify, Retryability};
use crate::tokenizer::TokenCounter;

/// Separator placed between units merged into one chunk.
const UNIT_SEPARATOR: &str = "\n\n";

#[derive(Clone, Debug)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    /// Token overlap seeded between consecutive forced-split pieces.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: PipelineConfig::DEFAULT_MAX_TOKENS,
            overlap_tokens: PipelineConfig::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ChunkerError {
    #[error("chunk token budget must be positive")]
    #[diagnostic(
        code(chunkforge::chunker::zero_budget),
        help("Set max_tokens to the embedding model's input limit minus a safety margin.")
    )]
    ZeroBudget,

    #[error("overlap of {overlap} tokens leaves no room under a {max} token budget")]
    #[diagnostic(
        code(chunkforge::chunker::overlap),
        help("Overlap must be strictly smaller than the chunk budget.")
    )]
    OverlapTooLarge { overlap: usize, max: usize },
}

impl Classify for ChunkerError {
    fn retryability(&self) -> Retryability {
        // Both variants are configuration errors; retrying cannot fix them.
        match self {
            ChunkerError::ZeroBudget | ChunkerError::OverlapTooLarge { .. } => {
                Retryability::NonRetryable
            }
        }
    }
}

/// A chunk before embedding: text, provenance, and the force-split marker.
#[derive(Clone, Debug)]
pub struct ChunkDraft {
    pub text: String,
    pub token_count: usize,
    pub kind: UnitKind,
    pub span: SourceSpan,
    pub heading: Option<String>,
    pub force_split: bool,
}

pub struct Chunker<'a> {
    counter: &'a TokenCounter,
    model: &'a str,
    config: ChunkerConfig,
}

impl<'a> Chunker<'a> {
    pub fn new(counter: &'a TokenCounter, model: &'a str, config: ChunkerConfig) -> Self {
        Self {
            counter,
            model,
            config,
        }
    }

    /// Split `doc` into an ordered sequence of drafts, each at or under the
    /// token budget. An empty document yields zero drafts.
    pub fn chunk(&self, doc: &StructuredDocument) -> Result<Vec<ChunkDraft>, ChunkerError> {
        if self.config.max_tokens == 0 {
            return Err(ChunkerError::ZeroBudget);
        }
        if self.config.overlap_tokens >= self.config.max_tokens {
            return Err(ChunkerError::OverlapTooLarge {
                overlap: self.config.overlap_tokens,
                max: self.config.max_tokens,
            });
        }

        let sep_cost = self.count(UNIT_SEPARATOR);
        let mut drafts = Vec::new();
        let mut acc: Vec<&Unit> = Vec::new();
        let mut acc_tokens = 0usize;

        for unit in &doc.units {
            if unit.text.trim().is_empty() {
                continue;
            }
            let unit_tokens = self.count(&unit.text);

            if unit_tokens > self.config.max_tokens {
                self.flush(&mut acc, &mut acc_tokens, &mut drafts);
                self.split_oversized(unit, &mut drafts);
                continue;
            }

            let projected = if acc.is_empty() {
                unit_tokens
            } else {
                acc_tokens + sep_cost + unit_tokens
            };
            if !acc.is_empty() && projected > self.config.max_tokens {
                self.flush(&mut acc, &mut acc_tokens, &mut drafts);
                acc.push(unit);
                acc_tokens = unit_tokens;
            } else {
                acc.push(unit);
                acc_tokens = projected;
            }
        }
        self.flush(&mut acc, &mut acc_tokens, &mut drafts);
        Ok(drafts)
    }

    fn count(&self, text: &str) -> usize {
        self.counter.count(text, self.model)
    }

    /// Emit the accumulated units as one chunk carrying the metadata of the
    /// last contained unit.
    fn flush(&self, acc: &mut Vec<&Unit>, acc_tokens: &mut usize, out: &mut Vec<ChunkDraft>) {
        let (Some(first), Some(last)) = (acc.first(), acc.last()) else {
            return;
        };
        let text = acc
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join(UNIT_SEPARATOR);
        let token_count = self.count(&text);
        let span = cover_span(first.span, last.span);

        if token_count > self.config.max_tokens {
            // Merged text re-tokenized over budget despite the projection;
            // treat the joined text as one oversized unit.
            let synth = Unit {
                kind: last.kind,
                text,
                span,
                heading: last.heading.clone(),
            };
            self.split_oversized(&synth, out);
        } else {
            out.push(ChunkDraft {
                text,
                token_count,
                kind: last.kind,
                span,
                heading: last.heading.clone(),
                force_split: false,
            });
        }
        acc.clear();
        *acc_tokens = 0;
    }

    /// Forced split of a single over-budget unit: sentences first, hard
    /// character cutoff for any sentence that alone exceeds the budget.
    fn split_oversized(&self, unit: &Unit, out: &mut Vec<ChunkDraft>) {
        let budget = self.config.max_tokens;
        let overlap = self.config.overlap_tokens;
        let base = match unit.span {
            SourceSpan::Bytes { start, .. } => Some(start),
            SourceSpan::Millis { .. } => None,
        };

        let sentences: Vec<(usize, &str)> = unit.text.split_sentence_bound_indices().collect();
        let mut piece: Vec<(usize, &str)> = Vec::new();
        let mut piece_tokens = 0usize;

        for (off, sent) in sentences {
            if sent.trim().is_empty() {
                continue;
            }
            let sent_tokens = self.count(sent);

            if sent_tokens > budget {
                self.emit_piece(unit, base, &piece, out);
                piece.clear();
                piece_tokens = 0;
                for (cut_off, slice) in self.hard_cut(sent) {
                    self.push_forced(unit, base, off + cut_off, slice, out);
                }
                continue;
            }

            if !piece.is_empty() && piece_tokens + sent_tokens > budget {
                // Seed the next piece with the tail of this one, bounded by
                // the overlap budget and the chunk budget.
                let mut seed: Vec<(usize, &str)> = Vec::new();
                let mut seed_tokens = 0usize;
                if overlap > 0 {
                    for &(o, s) in piece.iter().rev() {
                        let t = self.count(s);
                        if seed_tokens + t > overlap || seed_tokens + t + sent_tokens > budget {
                            break;
                        }
                        seed.push((o, s));
                        seed_tokens += t;
                    }
                    seed.reverse();
                }
                self.emit_piece(unit, base, &piece, out);
                piece = seed;
                piece_tokens = seed_tokens;
            }
            piece.push((off, sent));
            piece_tokens += sent_tokens;
        }
        self.emit_piece(unit, base, &piece, out);
    }

    /// Emit one contiguous run of sentences as a forced-split draft.
    fn emit_piece(
        &self,
        unit: &Unit,
        base: Option<usize>,
        sents: &[(usize, &str)],
        out: &mut Vec<ChunkDraft>,
    ) {
        let (Some(&(first_off, _)), Some(&(last_off, last_sent))) = (sents.first(), sents.last())
        else {
            return;
        };
        let end_off = last_off + last_sent.len();
        let slice = &unit.text[first_off..end_off];

        if self.count(slice) <= self.config.max_tokens {
            self.push_forced(unit, base, first_off, slice, out);
        } else {
            for (cut_off, piece) in self.hard_cut(slice) {
                self.push_forced(unit, base, first_off + cut_off, piece, out);
            }
        }
    }

    fn push_forced(
        &self,
        unit: &Unit,
        base: Option<usize>,
        rel_off: usize,
        slice: &str,
        out: &mut Vec<ChunkDraft>,
    ) {
        let span = match (unit.span, base) {
            (SourceSpan::Bytes { .. }, Some(b)) => SourceSpan::Bytes {
                start: b + rel_off,
                end: b + rel_off + slice.len(),
            },
            (span, _) => span,
        };
        out.push(ChunkDraft {
            text: slice.to_string(),
            token_count: self.count(slice),
            kind: unit.kind,
            span,
            heading: unit.heading.clone(),
            force_split: true,
        });
    }

    /// Last-resort character cutoff. Pieces start at roughly four characters
    /// per token and shrink until they fit the budget; a single character is
    /// never split further.
    fn hard_cut<'t>(&self, text: &'t str) -> Vec<(usize, &'t str)> {
        let budget = self.config.max_tokens;
        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < text.len() {
            let mut take_chars = budget.saturating_mul(4).max(1);
            loop {
                let end = char_boundary_after(text, start, take_chars);
                let slice = &text[start..end];
                if self.count(slice) <= budget || slice.chars().count() <= 1 {
                    pieces.push((start, slice));
                    start = end;
                    break;
                }
                take_chars /= 2;
            }
        }
        pieces
    }
}

/// Byte index `n_chars` characters past `start_byte`, clamped to the end.
fn char_boundary_after(text: &str, start_byte: usize, n_chars: usize) -> usize {
    text[start_byte..]
        .char_indices()
        .nth(n_chars)
        .map(|(i, _)| start_byte + i)
        .unwrap_or(text.len())
}

fn cover_span(first: SourceSpan, last: SourceSpan) -> SourceSpan {
    match (first, last) {
        (SourceSpan::Bytes { start, .. }, SourceSpan::Bytes { end, .. }) => {
            SourceSpan::Bytes { start, end }
        }
        (SourceSpan::Millis { start, .. }, SourceSpan::Millis { end, .. }) => {
            SourceSpan::Millis { start, end }
        }
        (first, _) => first,
    }
}
