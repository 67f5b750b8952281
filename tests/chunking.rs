//! Chunker behavior against structural documents: size discipline, boundary
//! placement, ordering, and the forced-split fallback.

mod common;

use chunkforge::chunker::{Chunker, ChunkerConfig};
use chunkforge::config::PipelineConfig;
use chunkforge::document::{SourceSpan, StructuredDocument, Unit, UnitKind};
use chunkforge::extract::DocumentExtractor;
use chunkforge::tokenizer::TokenCounter;
use proptest::prelude::*;

use common::{section, words};

const MODEL: &str = "text-embedding-004";

fn default_chunker(counter: &TokenCounter) -> Chunker<'_> {
    Chunker::new(counter, MODEL, ChunkerConfig::default())
}

#[test]
fn fifty_token_document_is_one_chunk() {
    let counter = TokenCounter::new();
    let doc = DocumentExtractor::new().parse(&words(50));
    let drafts = default_chunker(&counter).chunk(&doc).unwrap();

    assert_eq!(drafts.len(), 1);
    assert!(!drafts[0].force_split);
    assert!(drafts[0].token_count <= PipelineConfig::DEFAULT_MAX_TOKENS);
}

#[test]
fn three_large_sections_break_on_section_boundaries() {
    let counter = TokenCounter::new();
    let text = format!(
        "{}{}{}",
        section("Alpha", 1700),
        section("Bravo", 1700),
        section("Charlie", 1700)
    );
    let doc = DocumentExtractor::new().parse(&text);
    let drafts = default_chunker(&counter).chunk(&doc).unwrap();

    assert_eq!(drafts.len(), 3, "one chunk per ~1700-token section");
    for draft in &drafts {
        assert!(draft.token_count <= PipelineConfig::DEFAULT_MAX_TOKENS);
        assert!(!draft.force_split, "section bodies fit without forcing");
    }
    // Each chunk holds one whole section body rather than a ragged split.
    for draft in &drafts {
        assert!(draft.token_count > 1_000, "section body stayed whole");
    }
}

#[test]
fn heading_context_is_carried_onto_chunks() {
    let counter = TokenCounter::new();
    let text = "# Setup Guide\n\nInstall the binary.\n\nConfigure the service.\n";
    let doc = DocumentExtractor::new().parse(text);
    let drafts = default_chunker(&counter).chunk(&doc).unwrap();

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].heading.as_deref(), Some("Setup Guide"));
}

#[test]
fn tables_and_lists_are_structural_units() {
    let counter = TokenCounter::new();
    let text = "\
# Data

| name | value |\n| ---- | ----- |\n| a | 1 |

- first item
- second item
";
    let doc = DocumentExtractor::new().parse(text);
    assert!(doc.units.iter().any(|u| u.kind == UnitKind::Table));
    assert!(doc.units.iter().any(|u| u.kind == UnitKind::List));

    let drafts = default_chunker(&counter).chunk(&doc).unwrap();
    assert!(!drafts.is_empty());
}

#[test]
fn oversized_section_forces_split_with_flag() {
    let counter = TokenCounter::new();
    let config = ChunkerConfig {
        max_tokens: 120,
        overlap_tokens: 16,
    };
    let chunker = Chunker::new(&counter, MODEL, config);

    let mut body = String::new();
    for i in 0..80 {
        body.push_str(&format!("Sentence number {i} carries a few tokens. "));
    }
    let doc = DocumentExtractor::new().parse(&body);
    let drafts = chunker.chunk(&doc).unwrap();

    assert!(drafts.len() > 1);
    for draft in &drafts {
        assert!(draft.token_count <= 120);
        assert!(draft.force_split, "every split-off piece carries the flag");
    }
}

#[test]
fn empty_and_whitespace_documents_chunk_to_nothing() {
    let counter = TokenCounter::new();
    let chunker = default_chunker(&counter);
    assert!(chunker
        .chunk(&DocumentExtractor::new().parse(""))
        .unwrap()
        .is_empty());
    assert!(chunker
        .chunk(&DocumentExtractor::new().parse("  \n\n \t \n"))
        .unwrap()
        .is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every chunk stays at or under the budget, regardless of input shape.
    #[test]
    fn chunk_size_invariant_holds(paragraphs in prop::collection::vec(
        prop::collection::vec("[a-z]{1,8}", 1..40),
        1..8,
    )) {
        let counter = TokenCounter::new();
        let config = ChunkerConfig { max_tokens: 60, overlap_tokens: 0 };
        let chunker = Chunker::new(&counter, MODEL, config);

        let mut doc = StructuredDocument::new();
        let mut offset = 0usize;
        for para in &paragraphs {
            let text = para.join(" ");
            let span = SourceSpan::Bytes { start: offset, end: offset + text.len() };
            offset += text.len() + 2;
            doc.push(Unit::new(UnitKind::Paragraph, text, span));
        }

        for draft in chunker.chunk(&doc).unwrap() {
            prop_assert!(draft.token_count <= 60, "{} > 60", draft.token_count);
        }
    }

    /// Chunks in index order have non-decreasing source offsets.
    #[test]
    fn chunk_ordering_invariant_holds(paragraphs in prop::collection::vec(
        prop::collection::vec("[a-z]{1,8}", 1..40),
        1..8,
    )) {
        let counter = TokenCounter::new();
        let config = ChunkerConfig { max_tokens: 40, overlap_tokens: 0 };
        let chunker = Chunker::new(&counter, MODEL, config);

        let mut doc = StructuredDocument::new();
        let mut offset = 0usize;
        for para in &paragraphs {
            let text = para.join(" ");
            let span = SourceSpan::Bytes { start: offset, end: offset + text.len() };
            offset += text.len() + 2;
            doc.push(Unit::new(UnitKind::Paragraph, text, span));
        }

        let drafts = chunker.chunk(&doc).unwrap();
        let mut prev = 0u64;
        for draft in &drafts {
            let start = draft.span.start_ordinal();
            prop_assert!(start >= prev, "offsets regressed: {start} < {prev}");
            prev = start;
        }
    }
}
