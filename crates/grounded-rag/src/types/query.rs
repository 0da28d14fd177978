//! Retrieval request types

use serde::{Deserialize, Serialize};

/// Retrieval request scoped to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    /// Agent whose document set bounds the search
    pub agent_id: String,
    /// Natural-language query
    pub query: String,
    /// Number of fragments to return (config default if unset)
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Inclusive similarity floor (config default if unset)
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

impl RetrieveRequest {
    pub fn new(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            query: query.into(),
            top_k: None,
            min_similarity: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }
}
