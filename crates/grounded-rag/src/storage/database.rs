//! SQLite primary store
//!
//! Durable home of source documents, extracted text, fragments (kept and
//! discarded) and embeddings. The analytical index is rebuilt from here.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    DiscardReason, DocumentStatus, EmbeddingRecord, QualityFlag, SourceDocument, TextFragment,
};

/// SQLite-backed primary store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Row counts for health and info endpoints
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DatabaseStats {
    pub documents: usize,
    pub fragments: usize,
    pub kept_fragments: usize,
    pub embeddings: usize,
}

impl Database {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
        "#).map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS source_documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                status TEXT NOT NULL,
                status_reason TEXT,
                resumable INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_source_documents_owner ON source_documents(owner_id);

            CREATE TABLE IF NOT EXISTS document_agents (
                document_id TEXT NOT NULL REFERENCES source_documents(id) ON DELETE CASCADE,
                agent_id TEXT NOT NULL,
                PRIMARY KEY (document_id, agent_id)
            );

            CREATE INDEX IF NOT EXISTS idx_document_agents_agent ON document_agents(agent_id);

            CREATE TABLE IF NOT EXISTS extracted_texts (
                document_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS text_fragments (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                fragment_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                quality TEXT NOT NULL,
                discard_reason TEXT,
                UNIQUE (document_id, fragment_index)
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                fragment_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                fragment_index INTEGER NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                agent_scope TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_document ON embeddings(document_id);
        "#)
        .map_err(|e| Error::storage(format!("Failed to run migrations: {}", e)))?;

        tracing::debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Source Documents ====================

    /// Insert or update a document and its agent assignments
    pub fn upsert_document(&self, doc: &SourceDocument) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO source_documents (
                id, owner_id, filename, mime_type, size_bytes, content_hash, blob_key,
                status, status_reason, resumable, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                mime_type = excluded.mime_type,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                blob_key = excluded.blob_key,
                status = excluded.status,
                status_reason = excluded.status_reason,
                resumable = excluded.resumable,
                updated_at = excluded.updated_at
            "#,
            params![
                doc.id.to_string(),
                doc.owner_id,
                doc.filename,
                doc.mime_type,
                doc.size_bytes as i64,
                doc.content_hash,
                doc.blob_key,
                doc.status.as_str(),
                doc.status_reason,
                doc.resumable,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        ).map_err(|e| Error::storage(format!("Failed to upsert document: {}", e)))?;

        tx.execute(
            "DELETE FROM document_agents WHERE document_id = ?1",
            params![doc.id.to_string()],
        )?;
        for agent_id in &doc.agent_ids {
            tx.execute(
                "INSERT INTO document_agents (document_id, agent_id) VALUES (?1, ?2)",
                params![doc.id.to_string(), agent_id],
            )?;
        }

        // Keep the scope copy on embeddings aligned with the document
        let scope = serde_json::to_string(&doc.agent_ids)?;
        tx.execute(
            "UPDATE embeddings SET agent_scope = ?1 WHERE document_id = ?2",
            params![scope, doc.id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Get a document by id
    pub fn get_document(&self, id: &Uuid) -> Result<Option<SourceDocument>> {
        let conn = self.conn.lock();

        let doc = conn
            .query_row(
                "SELECT * FROM source_documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .optional()
            .map_err(|e| Error::storage(format!("Failed to get document: {}", e)))?;

        match doc {
            Some(mut doc) => {
                doc.agent_ids = load_agents(&conn, &doc.id)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// List all documents, newest first
    pub fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare("SELECT * FROM source_documents ORDER BY created_at DESC")
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let docs: Vec<SourceDocument> = stmt
            .query_map([], row_to_document)?
            .collect::<rusqlite::Result<_>>()?;

        docs.into_iter()
            .map(|mut doc| {
                doc.agent_ids = load_agents(&conn, &doc.id)?;
                Ok(doc)
            })
            .collect()
    }

    /// Documents assigned to an agent
    pub fn documents_for_agent(&self, agent_id: &str) -> Result<Vec<SourceDocument>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT d.* FROM source_documents d
            JOIN document_agents a ON a.document_id = d.id
            WHERE a.agent_id = ?1
            ORDER BY d.created_at
            "#,
        )?;

        let docs: Vec<SourceDocument> = stmt
            .query_map(params![agent_id], row_to_document)?
            .collect::<rusqlite::Result<_>>()?;

        docs.into_iter()
            .map(|mut doc| {
                doc.agent_ids = load_agents(&conn, &doc.id)?;
                Ok(doc)
            })
            .collect()
    }

    // ==================== Extracted Text ====================

    pub fn put_extracted_text(&self, document_id: &Uuid, text: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO extracted_texts (document_id, text, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(document_id) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at
            "#,
            params![document_id.to_string(), text, Utc::now().to_rfc3339()],
        ).map_err(|e| Error::storage(format!("Failed to store extracted text: {}", e)))?;
        Ok(())
    }

    pub fn get_extracted_text(&self, document_id: &Uuid) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT text FROM extracted_texts WHERE document_id = ?1",
                params![document_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    // ==================== Fragments ====================

    /// Delete every fragment and embedding of a document, returning fragments removed
    pub fn delete_fragments(&self, document_id: &Uuid) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM embeddings WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        let deleted = tx.execute(
            "DELETE FROM text_fragments WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;

        tx.commit()?;
        Ok(deleted)
    }

    /// Insert fragments in one transaction
    pub fn insert_fragments(&self, fragments: &[TextFragment]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO text_fragments (
                    id, document_id, fragment_index, text, start_offset, end_offset,
                    token_count, quality, discard_reason
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for fragment in fragments {
                stmt.execute(params![
                    fragment.id.to_string(),
                    fragment.document_id.to_string(),
                    fragment.index as i64,
                    fragment.text,
                    fragment.start_offset as i64,
                    fragment.end_offset as i64,
                    fragment.token_count as i64,
                    quality_to_string(fragment.quality),
                    fragment.discard_reason.map(|r| r.as_str()),
                ])
                .map_err(|e| Error::storage(format!("Failed to insert fragment: {}", e)))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Fragments of a document ordered by index
    pub fn list_fragments(&self, document_id: &Uuid) -> Result<Vec<TextFragment>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT * FROM text_fragments WHERE document_id = ?1 ORDER BY fragment_index",
        )?;

        let fragments = stmt
            .query_map(params![document_id.to_string()], row_to_fragment)?
            .collect::<rusqlite::Result<_>>()?;

        Ok(fragments)
    }

    /// Fragments by id, in the order of `ids`
    pub fn get_fragments(&self, ids: &[Uuid]) -> Result<Vec<TextFragment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM text_fragments WHERE id = ?1")?;

        let mut fragments = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(fragment) = stmt
                .query_row(params![id.to_string()], row_to_fragment)
                .optional()?
            {
                fragments.push(fragment);
            }
        }

        Ok(fragments)
    }

    // ==================== Embeddings ====================

    pub fn put_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO embeddings (
                fragment_id, document_id, fragment_index, dimensions, vector, agent_scope, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.fragment_id.to_string(),
                record.document_id.to_string(),
                record.fragment_index as i64,
                record.vector.len() as i64,
                vector_to_bytes(&record.vector),
                serde_json::to_string(&record.agent_scope_ids)?,
                record.created_at.to_rfc3339(),
            ],
        ).map_err(|e| Error::storage(format!("Failed to store embedding: {}", e)))?;
        Ok(())
    }

    pub fn embedding_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT fragment_id FROM embeddings WHERE document_id = ?1")?;

        let ids = stmt
            .query_map(params![document_id.to_string()], |row| {
                let id: String = row.get(0)?;
                parse_uuid(0, &id)
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(ids)
    }

    /// Document ids that have at least one embedding
    pub fn embedded_document_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT document_id FROM embeddings")?;

        let ids = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                parse_uuid(0, &id)
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(ids)
    }

    pub fn list_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fragment_id, document_id, fragment_index, vector, agent_scope, created_at FROM embeddings",
        )?;

        let records = stmt
            .query_map([], |row| {
                let fragment_id: String = row.get(0)?;
                let document_id: String = row.get(1)?;
                let vector: Vec<u8> = row.get(3)?;
                let scope: String = row.get(4)?;
                let created_at: String = row.get(5)?;

                Ok(EmbeddingRecord {
                    fragment_id: parse_uuid(0, &fragment_id)?,
                    document_id: parse_uuid(1, &document_id)?,
                    fragment_index: row.get::<_, i64>(2)? as u32,
                    vector: bytes_to_vector(&vector),
                    agent_scope_ids: serde_json::from_str::<BTreeSet<String>>(&scope)
                        .unwrap_or_default(),
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(records)
    }

    // ==================== Stats ====================

    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            documents: count("SELECT COUNT(*) FROM source_documents")?,
            fragments: count("SELECT COUNT(*) FROM text_fragments")?,
            kept_fragments: count("SELECT COUNT(*) FROM text_fragments WHERE quality = 'kept'")?,
            embeddings: count("SELECT COUNT(*) FROM embeddings")?,
        })
    }
}

// ==================== Row helpers ====================

fn load_agents(conn: &Connection, document_id: &Uuid) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT agent_id FROM document_agents WHERE document_id = ?1")?;
    let agents = stmt
        .query_map(params![document_id.to_string()], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(agents)
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn quality_to_string(quality: QualityFlag) -> &'static str {
    match quality {
        QualityFlag::Kept => "kept",
        QualityFlag::Discarded => "discarded",
    }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<SourceDocument> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(SourceDocument {
        id: parse_uuid(0, &id)?,
        owner_id: row.get("owner_id")?,
        agent_ids: BTreeSet::new(),
        filename: row.get("filename")?,
        mime_type: row.get("mime_type")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        content_hash: row.get("content_hash")?,
        blob_key: row.get("blob_key")?,
        status: DocumentStatus::parse(&status),
        status_reason: row.get("status_reason")?,
        resumable: row.get("resumable")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn row_to_fragment(row: &rusqlite::Row) -> rusqlite::Result<TextFragment> {
    let id: String = row.get("id")?;
    let document_id: String = row.get("document_id")?;
    let quality: String = row.get("quality")?;
    let reason: Option<String> = row.get("discard_reason")?;

    Ok(TextFragment {
        id: parse_uuid(0, &id)?,
        document_id: parse_uuid(1, &document_id)?,
        index: row.get::<_, i64>("fragment_index")? as u32,
        text: row.get("text")?,
        start_offset: row.get::<_, i64>("start_offset")? as usize,
        end_offset: row.get::<_, i64>("end_offset")? as usize,
        token_count: row.get::<_, i64>("token_count")? as usize,
        quality: if quality == "kept" { QualityFlag::Kept } else { QualityFlag::Discarded },
        discard_reason: reason.as_deref().and_then(DiscardReason::parse),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(agent: &str) -> SourceDocument {
        SourceDocument::new("owner-1", vec![agent.to_string()], "manual.pdf", b"%PDF-1.7 body")
    }

    #[test]
    fn test_upsert_and_get_document() {
        let db = Database::in_memory().unwrap();
        let mut doc = sample_document("support");
        db.upsert_document(&doc).unwrap();

        doc.set_status(DocumentStatus::Failed, Some("rate limited".into()));
        doc.resumable = true;
        doc.agent_ids.insert("sales".into());
        db.upsert_document(&doc).unwrap();

        let stored = db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.resumable);
        assert_eq!(stored.agent_ids.len(), 2);
        assert_eq!(db.list_documents().unwrap().len(), 1);
    }

    #[test]
    fn test_documents_for_agent() {
        let db = Database::in_memory().unwrap();
        db.upsert_document(&sample_document("support")).unwrap();
        db.upsert_document(&sample_document("legal")).unwrap();

        assert_eq!(db.documents_for_agent("support").unwrap().len(), 1);
        assert!(db.documents_for_agent("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_delete_fragments_removes_embeddings() {
        let db = Database::in_memory().unwrap();
        let doc = sample_document("support");
        db.upsert_document(&doc).unwrap();

        let kept = TextFragment::new(doc.id, 0, "kept text".into(), 0, 9, 2);
        let mut dropped = TextFragment::new(doc.id, 1, "3".into(), 10, 11, 1);
        dropped.discard(DiscardReason::PageNumber);
        db.insert_fragments(&[kept.clone(), dropped]).unwrap();
        db.put_embedding(&EmbeddingRecord::new(&kept, vec![0.5, -0.25, 1.0], doc.agent_ids.clone()))
            .unwrap();

        let fragments = db.list_fragments(&doc.id).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].discard_reason, Some(DiscardReason::PageNumber));

        let embeddings = db.list_embeddings().unwrap();
        assert_eq!(embeddings[0].vector, vec![0.5, -0.25, 1.0]);

        assert_eq!(db.delete_fragments(&doc.id).unwrap(), 2);
        assert!(db.embedding_ids(&doc.id).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().fragments, 0);
    }

    #[test]
    fn test_extracted_text_overwrite() {
        let db = Database::in_memory().unwrap();
        let id = Uuid::new_v4();
        db.put_extracted_text(&id, "first").unwrap();
        db.put_extracted_text(&id, "second").unwrap();
        assert_eq!(db.get_extracted_text(&id).unwrap().as_deref(), Some("second"));
    }
}
