//! Source documents, text fragments and embedding records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Lifecycle of an uploaded file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Chunked,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Chunked => "chunked",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "extracting" => Self::Extracting,
            "chunked" => Self::Chunked,
            "indexed" => Self::Indexed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Document ID
    pub id: Uuid,
    /// Uploading user
    pub owner_id: String,
    /// Agents allowed to retrieve from this document
    pub agent_ids: BTreeSet<String>,
    /// Original filename
    pub filename: String,
    /// MIME type guessed from the filename
    pub mime_type: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// SHA-256 of the original bytes
    pub content_hash: String,
    /// Blob key of the original bytes
    pub blob_key: String,
    /// Pipeline status
    pub status: DocumentStatus,
    /// Human-readable reason when `status` is failed
    pub status_reason: Option<String>,
    /// Whether a failed extraction can resume from its checkpoint
    pub resumable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Create a pending document for freshly uploaded bytes
    pub fn new(
        owner_id: impl Into<String>,
        agent_ids: impl IntoIterator<Item = String>,
        filename: impl Into<String>,
        data: &[u8],
    ) -> Self {
        let id = Uuid::new_v4();
        let owner_id = owner_id.into();
        let filename = filename.into();
        let now = Utc::now();

        Self {
            id,
            mime_type: mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string(),
            blob_key: format!("originals/{}/{}/{}", owner_id, id, sanitize_key(&filename)),
            owner_id,
            agent_ids: agent_ids.into_iter().collect(),
            filename,
            size_bytes: data.len() as u64,
            content_hash: content_hash(data),
            status: DocumentStatus::Pending,
            status_reason: None,
            resumable: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Key under which extraction checkpoints for this document are grouped
    pub fn document_key(&self) -> String {
        self.id.to_string()
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }

    pub fn set_status(&mut self, status: DocumentStatus, reason: Option<String>) {
        self.status = status;
        self.status_reason = reason;
        self.updated_at = Utc::now();
    }
}

/// Hex SHA-256 of a byte slice
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Keep blob keys to a safe character set
pub fn sanitize_key(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Why a fragment was excluded from the index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Repeating dot-leader table-of-contents lines
    TableOfContents,
    /// Bare page-number artifact
    PageNumber,
    /// Trimmed text below the character floor
    TooShort,
    /// Mostly separators and punctuation
    SeparatorHeavy,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TableOfContents => "table_of_contents",
            Self::PageNumber => "page_number",
            Self::TooShort => "too_short",
            Self::SeparatorHeavy => "separator_heavy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table_of_contents" => Some(Self::TableOfContents),
            "page_number" => Some(Self::PageNumber),
            "too_short" => Some(Self::TooShort),
            "separator_heavy" => Some(Self::SeparatorHeavy),
            _ => None,
        }
    }
}

/// Whether a fragment is indexed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Kept,
    Discarded,
}

/// A bounded slice of extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFragment {
    /// Fragment ID (shared by the primary and analytical stores)
    pub id: Uuid,
    /// Owning document
    pub document_id: Uuid,
    /// Position within the document
    pub index: u32,
    /// Exact slice `text[start_offset..end_offset]` of the combined text
    pub text: String,
    /// Byte offset of the first character
    pub start_offset: usize,
    /// Byte offset one past the last character
    pub end_offset: usize,
    /// Number of tokens in the fragment
    pub token_count: usize,
    pub quality: QualityFlag,
    pub discard_reason: Option<DiscardReason>,
}

impl TextFragment {
    pub fn new(
        document_id: Uuid,
        index: u32,
        text: String,
        start_offset: usize,
        end_offset: usize,
        token_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            index,
            text,
            start_offset,
            end_offset,
            token_count,
            quality: QualityFlag::Kept,
            discard_reason: None,
        }
    }

    pub fn is_kept(&self) -> bool {
        self.quality == QualityFlag::Kept
    }

    pub fn discard(&mut self, reason: DiscardReason) {
        self.quality = QualityFlag::Discarded;
        self.discard_reason = Some(reason);
    }
}

/// One vector for one kept fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    /// Copied from the fragment so ranking needs no join
    pub fragment_index: u32,
    pub vector: Vec<f32>,
    /// Agents allowed to retrieve this fragment
    pub agent_scope_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(fragment: &TextFragment, vector: Vec<f32>, agent_scope_ids: BTreeSet<String>) -> Self {
        Self {
            fragment_id: fragment.id,
            document_id: fragment.document_id,
            fragment_index: fragment.index,
            vector,
            agent_scope_ids,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document() {
        let doc = SourceDocument::new(
            "user-1",
            vec!["legal".to_string()],
            "Annual Report 2024.pdf",
            b"%PDF-1.4",
        );

        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.is_pdf());
        assert_eq!(doc.size_bytes, 8);
        assert!(doc.blob_key.ends_with("Annual_Report_2024.pdf"));
        assert!(doc.agent_ids.contains("legal"));
    }

    #[test]
    fn test_discard_tags_fragment() {
        let mut fragment = TextFragment::new(Uuid::new_v4(), 0, "12".into(), 0, 2, 1);
        assert!(fragment.is_kept());
        fragment.discard(DiscardReason::PageNumber);
        assert!(!fragment.is_kept());
        assert_eq!(fragment.discard_reason, Some(DiscardReason::PageNumber));
    }
}
