//! Retrieval results and bound citations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One fragment returned for a query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedFragment {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    /// Position of the fragment within its document
    pub index: u32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub similarity: f32,
}

/// Ranked fragments for one query, at most `top_k` long
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub fragments: Vec<RetrievedFragment>,
}

impl RetrievalResult {
    pub fn new(fragments: Vec<RetrievedFragment>) -> Self {
        Self { fragments }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// No fragment cleared the threshold; the caller has no grounding
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Citation number bound to one retrieved fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based citation number
    pub number: usize,
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    /// Source filename, when the document is still registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub fragment_index: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub similarity: f32,
    /// Fragment text shown to the generator
    pub text: String,
}

impl Citation {
    /// Short inline form: `[n] filename (fragment i)`
    pub fn format_inline(&self) -> String {
        format!(
            "[{}] {} (fragment {})",
            self.number,
            self.filename.as_deref().unwrap_or("unknown source"),
            self.fragment_index
        )
    }
}

/// Inclusive range of citation numbers the generator may emit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationRange {
    pub min: usize,
    pub max: usize,
}

/// Retrieval response with citations pre-bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub agent_id: String,
    pub query: String,
    pub citations: Vec<Citation>,
    /// `None` when nothing was retrieved: no citation is valid
    pub valid_citations: Option<CitationRange>,
    /// False when retrieval found nothing above the threshold
    pub grounded: bool,
    /// Numbered context block for the answer generator
    pub context: String,
    pub processing_time_ms: u64,
}
