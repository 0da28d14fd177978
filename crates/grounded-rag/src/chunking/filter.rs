//! Garbage fragment rules
//!
//! Table-of-contents lines and page-number artifacts are short and generic,
//! so they score well against almost any query while carrying nothing. Each
//! rule is a predicate; the filter tags a fragment with the first rule that
//! matches.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkingConfig;
use crate::types::{DiscardReason, TextFragment};
use std::collections::BTreeMap;

/// Heading followed by a dot leader (or similar) and a page number
static TOC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\S.*?(?:[.·…_]\s?){4,}\s*\d{1,4}\s*$").expect("valid TOC regex")
});

/// "12", "- 12 -", "Page 3 of 40", "Página 3 de 40", "p. 7"
static PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:-\s*)?(?:p[áa]g(?:ina)?\.?|page|p\.)?\s*\d{1,4}(?:\s*(?:de|of|/)\s*\d{1,4})?(?:\s*-)?$")
        .expect("valid page number regex")
});

pub fn is_toc_line(line: &str) -> bool {
    TOC_LINE.is_match(line)
}

pub fn is_page_number(text: &str) -> bool {
    PAGE_NUMBER.is_match(text.trim())
}

/// One structural junk pattern
pub trait GarbageRule: Send + Sync {
    fn reason(&self) -> DiscardReason;

    fn matches(&self, text: &str, token_count: usize) -> bool;
}

/// Mostly dot-leader lines
pub struct TableOfContentsRule {
    pub min_line_ratio: f32,
}

impl GarbageRule for TableOfContentsRule {
    fn reason(&self) -> DiscardReason {
        DiscardReason::TableOfContents
    }

    fn matches(&self, text: &str, _token_count: usize) -> bool {
        let (mut lines, mut toc) = (0usize, 0usize);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            lines += 1;
            if is_toc_line(line) {
                toc += 1;
            }
        }
        toc > 0 && toc as f32 / lines as f32 >= self.min_line_ratio
    }
}

/// A bare page number
pub struct PageNumberRule {
    pub max_tokens: usize,
}

impl GarbageRule for PageNumberRule {
    fn reason(&self) -> DiscardReason {
        DiscardReason::PageNumber
    }

    fn matches(&self, text: &str, token_count: usize) -> bool {
        token_count <= self.max_tokens && is_page_number(text)
    }
}

/// Mostly punctuation, rules and box-drawing
pub struct SeparatorRule {
    pub max_ratio: f32,
}

impl GarbageRule for SeparatorRule {
    fn reason(&self) -> DiscardReason {
        DiscardReason::SeparatorHeavy
    }

    fn matches(&self, text: &str, _token_count: usize) -> bool {
        let (mut visible, mut separators) = (0usize, 0usize);
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if !c.is_alphanumeric() {
                separators += 1;
            }
        }
        visible > 0 && separators as f32 / visible as f32 > self.max_ratio
    }
}

/// Below the character floor
pub struct MinLengthRule {
    pub min_chars: usize,
}

impl GarbageRule for MinLengthRule {
    fn reason(&self) -> DiscardReason {
        DiscardReason::TooShort
    }

    fn matches(&self, text: &str, _token_count: usize) -> bool {
        text.trim().chars().count() < self.min_chars
    }
}

/// Kept/discarded counts from one filter pass
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct FilterStats {
    pub kept: usize,
    pub discarded: usize,
    pub reasons: BTreeMap<DiscardReason, usize>,
}

/// Ordered rule list applied to every fragment
pub struct GarbageFilter {
    rules: Vec<Box<dyn GarbageRule>>,
}

impl GarbageFilter {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard rules, most specific first
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::empty()
            .with_rule(TableOfContentsRule {
                min_line_ratio: config.toc_line_ratio,
            })
            .with_rule(PageNumberRule {
                max_tokens: config.max_page_number_tokens,
            })
            .with_rule(SeparatorRule {
                max_ratio: config.separator_ratio,
            })
            .with_rule(MinLengthRule {
                min_chars: config.min_chars,
            })
    }

    pub fn with_rule(mut self, rule: impl GarbageRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// First matching rule, if any
    pub fn classify(&self, text: &str, token_count: usize) -> Option<DiscardReason> {
        self.rules
            .iter()
            .find(|rule| rule.matches(text, token_count))
            .map(|rule| rule.reason())
    }

    /// Tag discarded fragments in place; nothing is removed
    pub fn apply(&self, fragments: &mut [TextFragment]) -> FilterStats {
        let mut stats = FilterStats::default();
        for fragment in fragments.iter_mut() {
            match self.classify(&fragment.text, fragment.token_count) {
                Some(reason) => {
                    fragment.discard(reason);
                    stats.discarded += 1;
                    *stats.reasons.entry(reason).or_default() += 1;
                }
                None => stats.kept += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> GarbageFilter {
        GarbageFilter::from_config(&ChunkingConfig::default())
    }

    #[test]
    fn test_page_number_patterns() {
        for text in ["12", " - 12 - ", "Página 3 de 40", "Page 3 of 40", "pag. 7", "4/9"] {
            assert_eq!(filter().classify(text, 4), Some(DiscardReason::PageNumber), "{text}");
        }
        assert!(!is_page_number("Section 12 covers pumps"));
    }

    #[test]
    fn test_toc_block() {
        let toc = "1. Introduction ........................ 3\n\
                   2. Scope ............................... 5\n\
                   3. Maintenance procedures .............. 8\n";
        assert_eq!(filter().classify(toc, 30), Some(DiscardReason::TableOfContents));
    }

    #[test]
    fn test_separator_heavy() {
        let rule = "==========================================================\n* * * * * * * * * *";
        assert_eq!(filter().classify(rule, 20), Some(DiscardReason::SeparatorHeavy));
    }

    #[test]
    fn test_real_paragraph_is_kept() {
        let text = "Operators must record the discharge pressure after every restart, \
                    and escalate readings above 8 bar to the shift supervisor.";
        assert_eq!(filter().classify(text, 25), None);
        assert_eq!(filter().classify("Scope", 1), Some(DiscardReason::TooShort));
    }

    #[test]
    fn test_custom_rule_is_pluggable() {
        struct Watermark;
        impl GarbageRule for Watermark {
            fn reason(&self) -> DiscardReason {
                DiscardReason::SeparatorHeavy
            }
            fn matches(&self, text: &str, _: usize) -> bool {
                text.contains("DRAFT DO NOT DISTRIBUTE")
            }
        }

        let filter = GarbageFilter::empty().with_rule(Watermark);
        assert!(filter.classify("DRAFT DO NOT DISTRIBUTE", 4).is_some());
        assert!(filter.classify("a real sentence", 3).is_none());
    }
}
