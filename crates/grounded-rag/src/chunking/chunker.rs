//! Token-window chunking with byte offsets into the combined text
//!
//! The text is first cut into blocks: paragraphs, runs of TOC lines and
//! lone page-number lines. Paragraph blocks are packed into fragments of up
//! to `chunk_tokens`, each starting with the last `overlap_tokens` of the
//! previous fragment; a paragraph longer than that is cut into windows that
//! share `overlap_tokens`. TOC and page-number blocks always stand alone and
//! never carry or receive overlap, so the filter can drop them without
//! taking real content along.

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::types::TextFragment;

use super::filter::{is_page_number, is_toc_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Paragraph,
    TableOfContents,
    PageNumber,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    start: usize,
    end: usize,
}

/// Byte spans of the tokens in `text`, offset by `base`
///
/// A token is any word-boundary segment that is not whitespace, so
/// punctuation counts.
fn token_spans(text: &str, base: usize) -> Vec<(usize, usize)> {
    text.split_word_bound_indices()
        .filter(|(_, segment)| !segment.chars().all(char::is_whitespace))
        .map(|(offset, segment)| (base + offset, base + offset + segment.len()))
        .collect()
}

pub fn count_tokens(text: &str) -> usize {
    token_spans(text, 0).len()
}

/// Splits combined text into ordered fragments
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_tokens: usize,
    overlap_tokens: usize,
    max_page_number_tokens: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_tokens: config.chunk_tokens.max(1),
            overlap_tokens: config.overlap_tokens.min(config.chunk_tokens.saturating_sub(1)),
            max_page_number_tokens: config.max_page_number_tokens,
        }
    }

    /// Fragments indexed from 0, each an exact slice of `text`
    pub fn chunk(&self, document_id: Uuid, text: &str) -> Vec<TextFragment> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut pack: Option<(usize, usize)> = None;
        let mut pack_tokens = 0usize;

        for block in self.blocks(text) {
            let tokens = count_tokens(&text[block.start..block.end]);

            if block.kind != BlockKind::Paragraph {
                spans.extend(pack.take());
                pack_tokens = 0;
                spans.push((block.start, block.end));
                continue;
            }

            if let Some((start, end)) = pack {
                if pack_tokens + tokens > self.chunk_tokens {
                    spans.push((start, end));
                    pack = None;
                    pack_tokens = 0;

                    // Start the next fragment with the tail of this one
                    if let Some((tail_start, tail_tokens)) = self.overlap_tail(text, start, end) {
                        if tail_tokens + tokens <= self.chunk_tokens {
                            pack = Some((tail_start, end));
                            pack_tokens = tail_tokens;
                        }
                    }
                }
            }

            if tokens > self.chunk_tokens {
                spans.extend(self.windows(text, block.start, block.end));
                continue;
            }

            pack = Some(match pack {
                Some((start, _)) => (start, block.end),
                None => (block.start, block.end),
            });
            pack_tokens += tokens;
        }
        spans.extend(pack);

        spans
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let slice = &text[start..end];
                TextFragment::new(
                    document_id,
                    index as u32,
                    slice.to_string(),
                    start,
                    end,
                    count_tokens(slice),
                )
            })
            .collect()
    }

    /// Start offset and token count of the last `overlap_tokens` of a span
    fn overlap_tail(&self, text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
        if self.overlap_tokens == 0 {
            return None;
        }
        let tokens = token_spans(&text[start..end], start);
        if tokens.len() <= self.overlap_tokens {
            return None;
        }
        Some((tokens[tokens.len() - self.overlap_tokens].0, self.overlap_tokens))
    }

    /// Overlapping token windows over one long paragraph
    fn windows(&self, text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
        let tokens = token_spans(&text[start..end], start);
        let mut windows = Vec::new();
        let mut first = 0;

        loop {
            let last = (first + self.chunk_tokens).min(tokens.len());
            windows.push((tokens[first].0, tokens[last - 1].1));
            if last == tokens.len() {
                break;
            }
            first = last - self.overlap_tokens;
        }

        windows
    }

    /// Paragraphs, TOC runs and page-number lines with their byte ranges
    fn blocks(&self, text: &str) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        let mut open = false;
        let mut offset = 0usize;

        for raw in text.split_inclusive('\n') {
            let line_start = offset;
            offset += raw.len();

            let content = raw.trim_end_matches(&['\n', '\r'][..]);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                open = false;
                continue;
            }

            let lead = content.len() - content.trim_start().len();
            let start = line_start + lead;
            let end = start + trimmed.len();

            let kind = if count_tokens(trimmed) <= self.max_page_number_tokens && is_page_number(trimmed) {
                BlockKind::PageNumber
            } else if is_toc_line(trimmed) {
                BlockKind::TableOfContents
            } else {
                BlockKind::Paragraph
            };

            match blocks.last_mut() {
                // TOC entries stay together even across blank lines
                Some(last) if kind == BlockKind::TableOfContents && last.kind == kind => {
                    last.end = end;
                }
                Some(last) if open && kind == BlockKind::Paragraph && last.kind == kind => {
                    last.end = end;
                }
                _ => blocks.push(Block { kind, start, end }),
            }
            open = kind == BlockKind::Paragraph;
        }

        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::GarbageFilter;
    use crate::types::DiscardReason;

    fn config(chunk_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_tokens,
            overlap_tokens,
            ..ChunkingConfig::default()
        }
    }

    fn words(n: usize, prefix: &str) -> String {
        (0..n).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_fragments_are_exact_slices() {
        let text = "First paragraph about pumps.\n\nSecond paragraph about seals.\n";
        let fragments = TextChunker::new(&config(500, 50)).chunk(Uuid::new_v4(), text);

        assert_eq!(fragments.len(), 1);
        let f = &fragments[0];
        assert_eq!(&text[f.start_offset..f.end_offset], f.text);
        assert!(f.text.starts_with("First") && f.text.ends_with("seals."));
    }

    #[test]
    fn test_paragraphs_pack_up_to_chunk_size() {
        let text = format!("{}\n\n{}\n\n{}", words(40, "a"), words(40, "b"), words(40, "c"));
        let fragments = TextChunker::new(&config(100, 10)).chunk(Uuid::new_v4(), &text);

        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].text.ends_with("b39"));
        assert_eq!(fragments[0].index, 0);
        assert_eq!(fragments[1].index, 1);

        // The second fragment repeats the last 10 tokens of the first
        assert!(fragments[1].text.starts_with("b30 "));
        assert!(fragments[1].text.ends_with("c39"));
        assert_eq!(fragments[1].token_count, 50);
        assert!(fragments[1].start_offset < fragments[0].end_offset);
        assert_eq!(&text[fragments[1].start_offset..fragments[1].end_offset], fragments[1].text);
    }

    #[test]
    fn test_no_overlap_when_paragraph_fills_the_chunk() {
        let text = format!("{}\n\n{}", words(60, "a"), words(95, "b"));
        let fragments = TextChunker::new(&config(100, 10)).chunk(Uuid::new_v4(), &text);

        assert_eq!(fragments.len(), 2);
        assert!(fragments[1].text.starts_with("b0"));
        assert_eq!(fragments[1].token_count, 95);
    }

    #[test]
    fn test_junk_blocks_never_share_overlap() {
        let text = format!("{}\n\n7\n\n{}", words(60, "a"), words(60, "b"));
        let fragments = TextChunker::new(&config(100, 10)).chunk(Uuid::new_v4(), &text);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[1].text, "7");
        assert!(fragments[2].text.starts_with("b0"));
    }

    #[test]
    fn test_long_paragraph_windows_overlap() {
        let text = words(250, "w");
        let fragments = TextChunker::new(&config(100, 10)).chunk(Uuid::new_v4(), &text);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].token_count, 100);
        assert!(fragments[0].text.ends_with("w99"));
        assert!(fragments[1].text.starts_with("w90 "));
        assert!(fragments[2].text.starts_with("w180 "));
        assert!(fragments[2].text.ends_with("w249"));
        for pair in fragments.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
        }
    }

    #[test]
    fn test_toc_page_number_and_paragraph_are_separated_and_filtered() {
        let text = "\
1. Introducción ........................ 3
2. Alcance ............................. 5
3. Procedimientos de mantenimiento ..... 8

Página 3 de 40

The maintenance team must inspect every pump housing weekly, record the pressure \
readings in the logbook and replace worn seals before the unit is restarted.
";
        let chunking = ChunkingConfig::default();
        let mut fragments = TextChunker::new(&chunking).chunk(Uuid::new_v4(), text);
        let stats = GarbageFilter::from_config(&chunking).apply(&mut fragments);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].discard_reason, Some(DiscardReason::TableOfContents));
        assert_eq!(fragments[1].discard_reason, Some(DiscardReason::PageNumber));
        assert!(fragments[2].is_kept());
        assert!(fragments[2].text.starts_with("The maintenance team"));
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.discarded, 2);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = format!("{}\n\n12\n\n{}", words(300, "x"), words(30, "y"));
        let chunker = TextChunker::new(&config(100, 20));
        let a: Vec<_> = chunker
            .chunk(Uuid::nil(), &text)
            .into_iter()
            .map(|f| (f.start_offset, f.end_offset, f.text))
            .collect();
        let b: Vec<_> = chunker
            .chunk(Uuid::nil(), &text)
            .into_iter()
            .map(|f| (f.start_offset, f.end_offset, f.text))
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_text_has_no_fragments() {
        assert!(TextChunker::new(&config(100, 10)).chunk(Uuid::nil(), "\n\n  \n").is_empty());
    }
}
