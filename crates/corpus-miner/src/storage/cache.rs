//! SQLite-backed incremental cache of mined documents
//!
//! Rows are keyed by document identity. The cache is read once when a run
//! starts and written once, in a single transaction, when it ends.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{DocumentIdentity, DocumentRecord, FileType, Language};

/// Persisted store of previously mined documents
#[derive(Clone)]
pub struct IncrementalCache {
    conn: Arc<Mutex<Connection>>,
}

impl IncrementalCache {
    /// Create or open the cache at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open cache {}: {}", path.display(), e)))?;

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.migrate()?;
        Ok(cache)
    }

    /// Create an in-memory cache (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.migrate()?;
        Ok(cache)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mined_documents (
                identity TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                creation_time TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                page_count INTEGER NOT NULL,
                extraction_ms INTEGER NOT NULL,
                error TEXT,
                content_hash TEXT,
                raw_text TEXT,
                cleaned_text TEXT,
                detected_language TEXT,
                normalized_text TEXT,
                lemmatized_text TEXT,
                filtered_text TEXT,
                cached_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_mined_documents_error ON mined_documents(error);
        "#,
        )?;

        tracing::debug!("Cache migrations complete");
        Ok(())
    }

    /// Snapshot of every cached record, keyed by identity
    pub fn load_all(&self) -> Result<HashMap<DocumentIdentity, DocumentRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT identity, file_path, file_name, file_type, creation_time, file_size,
                   page_count, extraction_ms, error, content_hash, raw_text, cleaned_text,
                   detected_language, normalized_text, lemmatized_text, filtered_text
            FROM mined_documents
            "#,
        )?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records
            .into_iter()
            .map(|record| (record.identity.clone(), record))
            .collect())
    }

    /// Insert or replace records in one transaction
    pub fn persist(&self, records: &[DocumentRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO mined_documents (
                    identity, file_path, file_name, file_type, creation_time, file_size,
                    page_count, extraction_ms, error, content_hash, raw_text, cleaned_text,
                    detected_language, normalized_text, lemmatized_text, filtered_text, cached_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
            )?;

            let now = Utc::now();
            for record in records {
                stmt.execute(params![
                    record.identity.as_str(),
                    record.file_path.to_string_lossy().into_owned(),
                    record.file_name,
                    file_type_to_str(record.file_type),
                    record.creation_time,
                    record.file_size as i64,
                    record.page_count as i64,
                    record.extraction_duration.as_millis() as i64,
                    record.error,
                    record.content_hash,
                    record.raw_text,
                    record.cleaned_text,
                    record.detected_language.map(|l| l.code()),
                    record.normalized_text,
                    record.lemmatized_text,
                    record.filtered_text,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!("Persisted {} records to the cache", records.len());
        Ok(records.len())
    }

    /// Remove one document; returns whether it was cached
    pub fn evict(&self, identity: &DocumentIdentity) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM mined_documents WHERE identity = ?1",
            params![identity.as_str()],
        )?;
        Ok(count > 0)
    }

    /// Remove several documents in one transaction; returns how many were cached
    pub fn evict_many(&self, identities: &[DocumentIdentity]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM mined_documents WHERE identity = ?1")?;
            for identity in identities {
                removed += stmt.execute(params![identity.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Number of cached documents
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM mined_documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DocumentRecord> {
    let identity: String = row.get(0)?;
    let file_path: String = row.get(1)?;
    let file_type: String = row.get(3)?;
    let creation_time: DateTime<Utc> = row.get(4)?;
    let file_size: i64 = row.get(5)?;
    let page_count: i64 = row.get(6)?;
    let extraction_ms: i64 = row.get(7)?;
    let detected_language: Option<String> = row.get(12)?;

    Ok(DocumentRecord {
        identity: DocumentIdentity::from_canonical(identity),
        file_path: PathBuf::from(file_path),
        file_name: row.get(2)?,
        file_type: str_to_file_type(&file_type),
        creation_time,
        file_size: file_size as u64,
        page_count: page_count as u32,
        extraction_duration: Duration::from_millis(extraction_ms.max(0) as u64),
        error: row.get(8)?,
        content_hash: row.get(9)?,
        raw_text: row.get(10)?,
        cleaned_text: row.get(11)?,
        detected_language: detected_language.as_deref().and_then(Language::from_code),
        normalized_text: row.get(13)?,
        lemmatized_text: row.get(14)?,
        filtered_text: row.get(15)?,
    })
}

fn file_type_to_str(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Txt => "txt",
        FileType::Doc => "doc",
        FileType::Docx => "docx",
        FileType::Pdf => "pdf",
        FileType::Xps => "xps",
        FileType::Image => "image",
        FileType::Unknown => "unknown",
    }
}

fn str_to_file_type(s: &str) -> FileType {
    match s {
        "image" => FileType::Image,
        other => FileType::from_extension(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentInput;
    use chrono::TimeZone;

    fn record(name: &str) -> DocumentRecord {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let input = DocumentInput::new(format!("/archive/{}.pdf", name), created, 2048);
        let mut record = DocumentRecord::new(&input);
        record.page_count = 3;
        record.extraction_duration = Duration::from_millis(1250);
        record.raw_text = Some("Budget report\n2024".to_string());
        record.cleaned_text = Some("Budget report 2024".to_string());
        record.detected_language = Some(Language::English);
        record.normalized_text = Some("budget report".to_string());
        record.lemmatized_text = Some("budget report".to_string());
        record.filtered_text = Some("budget report".to_string());
        record
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let cache = IncrementalCache::in_memory().unwrap();
        let mut failed = record("broken");
        failed.filtered_text = None;
        failed.fail("Timeout after 240.0s");

        cache.persist(&[record("a"), failed.clone()]).unwrap();
        assert_eq!(cache.len().unwrap(), 2);

        let loaded = cache.load_all().unwrap();
        let a = &loaded[&record("a").identity];
        assert_eq!(a, &record("a"));
        assert_eq!(loaded[&failed.identity].error.as_deref(), Some("Timeout after 240.0s"));
    }

    #[test]
    fn test_persist_replaces_existing_identity() {
        let cache = IncrementalCache::in_memory().unwrap();
        cache.persist(&[record("a")]).unwrap();

        let mut updated = record("a");
        updated.file_size = 4096;
        updated.filtered_text = Some("revised budget".to_string());
        cache.persist(&[updated.clone()]).unwrap();

        let loaded = cache.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&updated.identity].file_size, 4096);
        assert_eq!(loaded[&updated.identity].filtered_text.as_deref(), Some("revised budget"));
    }

    #[test]
    fn test_evict() {
        let cache = IncrementalCache::in_memory().unwrap();
        cache.persist(&[record("a"), record("b"), record("c")]).unwrap();

        assert!(cache.evict(&record("a").identity).unwrap());
        assert!(!cache.evict(&record("a").identity).unwrap());

        let removed = cache
            .evict_many(&[record("b").identity, record("missing").identity])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_open_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        IncrementalCache::open(&path).unwrap().persist(&[record("a")]).unwrap();
        let reopened = IncrementalCache::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert!(!reopened.is_empty().unwrap());
    }
}
