//! Citation binding for retrieved fragments
//!
//! Numbers `1..=N` are assigned in result order to exactly the `N` fragments
//! retrieved for one query. Any other number an answer generator emits
//! refers to nothing and is treated as a hallucinated reference.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::types::{Citation, CitationRange, RetrievalResult};

/// `[3]` or `[1, 4]`, with any whitespace before it
static CITATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\s*)\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid citation regex")
});

/// Answer text with invalid citation markers removed
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SanitizedAnswer {
    pub text: String,
    /// Valid numbers the answer cites, ascending
    pub cited: Vec<usize>,
    /// Invalid numbers that were stripped, ascending
    pub suppressed: Vec<usize>,
}

impl SanitizedAnswer {
    pub fn had_hallucinations(&self) -> bool {
        !self.suppressed.is_empty()
    }
}

/// Citations bound to one retrieval result
#[derive(Debug, Clone, Default)]
pub struct ReferenceBinder {
    citations: Vec<Citation>,
}

impl ReferenceBinder {
    /// Number the fragments of `result` from 1 in result order
    pub fn bind(result: &RetrievalResult, filenames: &HashMap<Uuid, String>) -> Self {
        let citations = result
            .fragments
            .iter()
            .enumerate()
            .map(|(i, fragment)| Citation {
                number: i + 1,
                fragment_id: fragment.fragment_id,
                document_id: fragment.document_id,
                filename: filenames.get(&fragment.document_id).cloned(),
                fragment_index: fragment.index,
                start_offset: fragment.start_offset,
                end_offset: fragment.end_offset,
                similarity: fragment.similarity,
                text: fragment.text.clone(),
            })
            .collect();

        Self { citations }
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// `1 <= n <= N`; never true when nothing was retrieved
    pub fn is_valid_citation(&self, n: usize) -> bool {
        n >= 1 && n <= self.citations.len()
    }

    pub fn valid_range(&self) -> Option<CitationRange> {
        (!self.citations.is_empty()).then(|| CitationRange {
            min: 1,
            max: self.citations.len(),
        })
    }

    pub fn get(&self, n: usize) -> Option<&Citation> {
        if self.is_valid_citation(n) {
            self.citations.get(n - 1)
        } else {
            None
        }
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn into_citations(self) -> Vec<Citation> {
        self.citations
    }

    /// Numbered context block for the answer generator
    pub fn build_context(&self) -> String {
        let mut context = String::new();
        for citation in &self.citations {
            context.push_str(&format!(
                "[{}] ({}, fragment {}, relevance {:.0}%)\n{}\n\n---\n\n",
                citation.number,
                citation.filename.as_deref().unwrap_or("unknown source"),
                citation.fragment_index,
                citation.similarity * 100.0,
                citation.text.trim()
            ));
        }
        context
    }

    /// Strip citation markers that fail `is_valid_citation`
    ///
    /// `[2, 9]` with only 2 valid becomes `[2]`; a marker with no valid
    /// number is removed together with the whitespace before it.
    pub fn sanitize_answer(&self, answer: &str) -> SanitizedAnswer {
        let mut cited = BTreeSet::new();
        let mut suppressed = BTreeSet::new();

        let text = CITATION_MARKER.replace_all(answer, |caps: &Captures| {
            // A number too large for usize can never be in range
            let numbers: Vec<usize> = caps[2]
                .split(',')
                .map(|n| n.trim().parse().unwrap_or(usize::MAX))
                .collect();
            let (valid, invalid): (Vec<usize>, Vec<usize>) =
                numbers.into_iter().partition(|n| self.is_valid_citation(*n));

            cited.extend(valid.iter().copied());
            suppressed.extend(invalid.iter().copied());

            if invalid.is_empty() {
                caps[0].to_string()
            } else if valid.is_empty() {
                String::new()
            } else {
                let list: Vec<String> = valid.iter().map(|n| n.to_string()).collect();
                format!("{}[{}]", &caps[1], list.join(", "))
            }
        });

        if !suppressed.is_empty() {
            tracing::warn!(
                "Suppressed hallucinated citations {:?} (valid range 1..={})",
                suppressed,
                self.citations.len()
            );
        }

        SanitizedAnswer {
            text: text.into_owned(),
            cited: cited.into_iter().collect(),
            suppressed: suppressed.into_iter().collect(),
        }
    }
}
