//! Structured document model: the unit sequence the chunker walks.
//!
//! Extractors produce a flat, ordered sequence of units rather than a tree;
//! heading context is carried on each unit so provenance survives chunking.

use serde::{Deserialize, Serialize};

/// Structural type of a unit (and, transitively, of the chunks built from
/// it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Heading,
    Paragraph,
    Table,
    List,
    VideoSegment,
    AudioSegment,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Heading => "heading",
            UnitKind::Paragraph => "paragraph",
            UnitKind::Table => "table",
            UnitKind::List => "list",
            UnitKind::VideoSegment => "video_segment",
            UnitKind::AudioSegment => "audio_segment",
        }
    }
}

/// Source location of a unit: a byte range for text sources, a millisecond
/// range for media.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum SourceSpan {
    Bytes { start: usize, end: usize },
    Millis { start: u64, end: u64 },
}

impl SourceSpan {
    /// Start position on a single axis, for ordering checks across chunks.
    pub fn start_ordinal(&self) -> u64 {
        match self {
            SourceSpan::Bytes { start, .. } => *start as u64,
            SourceSpan::Millis { start, .. } => *start,
        }
    }

    pub fn end_ordinal(&self) -> u64 {
        match self {
            SourceSpan::Bytes { end, .. } => *end as u64,
            SourceSpan::Millis { end, .. } => *end,
        }
    }
}

/// One structural unit of extracted content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub kind: UnitKind,
    pub text: String,
    pub span: SourceSpan,
    /// Closest enclosing heading, when the source had one.
    pub heading: Option<String>,
}

impl Unit {
    pub fn new(kind: UnitKind, text: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
            heading: None,
        }
    }

    #[must_use]
    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }
}

/// Ordered unit sequence for one source document.
#[derive(Clone, Debug, Default)]
pub struct StructuredDocument {
    pub units: Vec<Unit>,
}

impl StructuredDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: Unit) {
        self.units.push(unit);
    }

    /// True when no unit carries any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|u| u.text.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_units_count_as_empty() {
        let mut doc = StructuredDocument::new();
        doc.push(Unit::new(
            UnitKind::Paragraph,
            "   \n\t ",
            SourceSpan::Bytes { start: 0, end: 6 },
        ));
        assert!(doc.is_empty());

        doc.push(Unit::new(
            UnitKind::Paragraph,
            "actual content",
            SourceSpan::Bytes { start: 6, end: 20 },
        ));
        assert!(!doc.is_empty());
    }

    #[test]
    fn span_ordinals_cover_both_axes() {
        let b = SourceSpan::Bytes { start: 10, end: 40 };
        assert_eq!(b.start_ordinal(), 10);
        assert_eq!(b.end_ordinal(), 40);

        let m = SourceSpan::Millis {
            start: 120_000,
            end: 240_000,
        };
        assert_eq!(m.start_ordinal(), 120_000);
    }
}
