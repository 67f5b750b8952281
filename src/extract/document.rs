//! Structural extraction for text documents.
//!
//! Parses markdown-flavoured plain text into the unit sequence the chunker
//! walks: headings, paragraphs, tables, and lists, each with its byte span
//! and closest enclosing heading. This is deliberately format-light; exact
//! PDF/Office decoding is outside the chunk-boundary contract.

use async_trait::async_trait;

use crate::document::{SourceSpan, StructuredDocument, Unit, UnitKind};
use crate::fetch::FetchedSource;

use super::{Extraction, ExtractError, Extractor};

#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` into ordered structural units with absolute byte spans.
    pub fn parse(&self, text: &str) -> StructuredDocument {
        let mut doc = StructuredDocument::new();
        let mut heading: Option<String> = None;

        for (start, block) in blocks(text) {
            let trimmed = block.trim();
            if trimmed.is_empty() {
                continue;
            }
            let span = SourceSpan::Bytes {
                start,
                end: start + block.len(),
            };
            let kind = block_kind(trimmed);
            let mut unit = Unit::new(kind, trimmed, span);
            if kind == UnitKind::Heading {
                heading = Some(heading_text(trimmed));
            } else if let Some(h) = &heading {
                unit = unit.with_heading(h.clone());
            }
            doc.push(unit);
        }
        doc
    }
}

#[async_trait]
impl Extractor for DocumentExtractor {
    async fn extract(&self, source: &FetchedSource) -> Result<Extraction, ExtractError> {
        let text = std::str::from_utf8(&source.bytes).map_err(|e| ExtractError::Malformed {
            reason: format!("document is not valid UTF-8: {e}"),
        })?;
        Ok(Extraction::Text(self.parse(text)))
    }
}

/// Split into blank-line separated blocks, keeping each block's byte offset.
fn blocks(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut block_start: Option<usize> = None;
    let mut cursor = 0;

    for line in text.split_inclusive('\n') {
        let line_start = cursor;
        cursor += line.len();
        if line.trim().is_empty() {
            if let Some(start) = block_start.take() {
                out.push((start, text[start..line_start].trim_end_matches('\n')));
            }
        } else if block_start.is_none() {
            block_start = Some(line_start);
        }
    }
    if let Some(start) = block_start {
        out.push((start, text[start..].trim_end_matches('\n')));
    }
    out
}

fn block_kind(block: &str) -> UnitKind {
    let first = block.lines().next().unwrap_or("");
    if first.starts_with('#') {
        return UnitKind::Heading;
    }
    if first.trim_start().starts_with('|') && block.lines().count() > 1 {
        return UnitKind::Table;
    }
    if is_list_line(first) && block.lines().all(|l| is_list_line(l) || l.starts_with("  ")) {
        return UnitKind::List;
    }
    UnitKind::Paragraph
}

fn is_list_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("- ")
        || trimmed.starts_with("* ")
        || trimmed
            .split_once('.')
            .is_some_and(|(n, rest)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && rest.starts_with(' '))
}

fn heading_text(block: &str) -> String {
    block
        .lines()
        .next()
        .unwrap_or("")
        .trim_start_matches('#')
        .trim()
        .to_string()
}
