//! Document ingestion pipeline.
//!
//! `normalize → purge previous version → chunk → embed → index → record`.
//! Embedding is all-or-nothing per file: a batch failure aborts before any
//! chunk or document row is written, so the store never holds a partially
//! indexed document.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunker;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::ChunkRecord;
use crate::normalize;

pub struct Ingestor {
    pool: SqlitePool,
    index: VectorIndex,
    embeddings: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
}

/// Outcome of a batch directory load.
#[derive(Debug, Default, serde::Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        index: VectorIndex,
        embeddings: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            pool,
            index,
            embeddings,
            chunking,
        }
    }

    /// Ingest one document, replacing any earlier version with the same
    /// filename. Returns the new document id.
    pub async fn ingest(
        &self,
        content: &str,
        filename: &str,
        content_type: &str,
        extra_metadata: Value,
    ) -> Result<String> {
        let body = normalize::render_body(content, content_type)
            .with_context(|| format!("Failed to normalize {}", filename))?;

        let chunks = chunker::split(&body, self.chunking.chunk_size, self.chunking.overlap);
        let texts: Vec<String> = chunks.iter().cloned().collect();

        // Embed before touching any state: a provider failure must leave
        // the previous document version intact.
        let embeddings = self
            .embeddings
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed {}", filename))?;

        // Replace-on-conflict: deactivate prior versions, purge their chunks.
        let purged = self.index.delete_by_filename(filename).await?;
        if purged > 0 {
            info!(filename, purged, "replaced previous document version");
        }
        sqlx::query("UPDATE documents SET is_active = 0 WHERE filename = ? AND is_active = 1")
            .bind(filename)
            .execute(&self.pool)
            .await?;

        let doc_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let total_chunks = chunks.len();

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| {
                let mut metadata = json!({
                    "filename": filename,
                    "content_type": content_type,
                    "chunk_index": i,
                    "total_chunks": total_chunks,
                    "created_at": now,
                });
                if let (Value::Object(meta), Value::Object(extra)) =
                    (&mut metadata, &extra_metadata)
                {
                    for (k, v) in extra {
                        meta.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                ChunkRecord {
                    id: format!("{}_chunk_{}", doc_id, i),
                    document_id: doc_id.clone(),
                    filename: filename.to_string(),
                    chunk_index: i as i64,
                    text,
                    metadata,
                    embedding,
                }
            })
            .collect();

        self.index.upsert(&records).await?;

        let mut doc_metadata = extra_metadata;
        if content_type == "text/csv" {
            if let Value::Object(map) = &mut doc_metadata {
                map.insert(
                    "record_count".to_string(),
                    json!(normalize::csv_record_count(content)),
                );
            }
        }

        sqlx::query(
            "INSERT INTO documents
                 (id, filename, content_type, file_size, metadata_json, created_at, indexed_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&doc_id)
        .bind(filename)
        .bind(content_type)
        .bind(content.len() as i64)
        .bind(doc_metadata.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(filename, chunks = total_chunks, doc_id = %doc_id, "document indexed");
        Ok(doc_id)
    }

    /// Load every supported file under `dir`. Skips the whole load when the
    /// index already holds chunks, unless `force` is set. Per-file failures
    /// are collected, not fatal.
    pub async fn load_dir(&self, dir: &Path, force: bool) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        if !force && self.index.count().await? > 0 {
            info!("knowledge base already populated, skipping load (use --force to reload)");
            return Ok(report);
        }

        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let content_type = match path.extension().and_then(|e| e.to_str()) {
                Some("csv") => "text/csv",
                Some("json") => "application/json",
                Some("txt") | Some("md") => "text/plain",
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };
            report.total += 1;

            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();

            let result = async {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                self.ingest(&content, &filename, content_type, json!({})).await
            }
            .await;

            match result {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    warn!(filename = %filename, error = %e, "failed to load file");
                    report.errors.push(format!("{}: {:#}", filename, e));
                }
            }
        }

        info!(
            loaded = report.loaded,
            total = report.total,
            errors = report.errors.len(),
            "directory load complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddings;
    use crate::migrate::run_migrations;
    use sqlx::Row;

    async fn test_ingestor() -> Ingestor {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let index = VectorIndex::new(pool.clone());
        Ingestor::new(
            pool,
            index,
            Arc::new(HashEmbeddings::new(64)),
            ChunkingConfig {
                chunk_size: 100,
                overlap: 20,
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_creates_document_and_chunks() {
        let ingestor = test_ingestor().await;
        let doc_id = ingestor
            .ingest("short note", "note.txt", "text/plain", json!({}))
            .await
            .unwrap();

        assert_eq!(ingestor.index.count().await.unwrap(), 1);

        let row = sqlx::query("SELECT id FROM kb_chunks")
            .fetch_one(&ingestor.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("id"), format!("{}_chunk_0", doc_id));
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_version() {
        let ingestor = test_ingestor().await;
        let first = ingestor
            .ingest("version one body text", "doc.txt", "text/plain", json!({}))
            .await
            .unwrap();
        let second = ingestor
            .ingest("version two body text", "doc.txt", "text/plain", json!({}))
            .await
            .unwrap();
        assert_ne!(first, second);

        // Only the second version's chunks remain.
        let rows = sqlx::query("SELECT document_id FROM kb_chunks")
            .fetch_all(&ingestor.pool)
            .await
            .unwrap();
        assert!(rows
            .iter()
            .all(|r| r.get::<String, _>("document_id") == second));

        // One active document; the first survives as an inactive record.
        let active: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM documents WHERE filename = 'doc.txt' AND is_active = 1",
        )
        .fetch_one(&ingestor.pool)
        .await
        .unwrap()
        .get("n");
        assert_eq!(active, 1);

        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE filename = 'doc.txt'")
            .fetch_one(&ingestor.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_embed_failure_leaves_previous_version() {
        use crate::embedding::DisabledEmbeddings;

        let good = test_ingestor().await;
        good.ingest("stable content", "keep.txt", "text/plain", json!({}))
            .await
            .unwrap();

        let broken = Ingestor::new(
            good.pool.clone(),
            VectorIndex::new(good.pool.clone()),
            Arc::new(DisabledEmbeddings),
            ChunkingConfig {
                chunk_size: 100,
                overlap: 20,
            },
        );
        let result = broken
            .ingest("new content", "keep.txt", "text/plain", json!({}))
            .await;
        assert!(result.is_err());

        // Previous chunks and active document untouched.
        assert_eq!(good.index.count().await.unwrap(), 1);
        let active: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM documents WHERE filename = 'keep.txt' AND is_active = 1",
        )
        .fetch_one(&good.pool)
        .await
        .unwrap()
        .get("n");
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn test_invalid_json_document_is_error() {
        let ingestor = test_ingestor().await;
        let result = ingestor
            .ingest("{broken", "bad.json", "application/json", json!({}))
            .await;
        assert!(result.is_err());
        assert_eq!(ingestor.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chunk_metadata_fields() {
        let ingestor = test_ingestor().await;
        ingestor
            .ingest(
                "hello world",
                "m.txt",
                "text/plain",
                json!({ "source": "unit-test" }),
            )
            .await
            .unwrap();

        let row = sqlx::query("SELECT metadata_json FROM kb_chunks")
            .fetch_one(&ingestor.pool)
            .await
            .unwrap();
        let metadata: Value =
            serde_json::from_str(&row.get::<String, _>("metadata_json")).unwrap();
        assert_eq!(metadata["filename"], "m.txt");
        assert_eq!(metadata["chunk_index"], 0);
        assert_eq!(metadata["total_chunks"], 1);
        assert_eq!(metadata["source"], "unit-test");
    }

    #[tokio::test]
    async fn test_load_dir_skips_when_populated() {
        let ingestor = test_ingestor().await;
        ingestor
            .ingest("existing", "seed.txt", "text/plain", json!({}))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("new.txt"), "new content").unwrap();

        let report = ingestor.load_dir(dir.path(), false).await.unwrap();
        assert_eq!(report.loaded, 0);

        let report = ingestor.load_dir(dir.path(), true).await.unwrap();
        assert_eq!(report.loaded, 1);
    }

    #[tokio::test]
    async fn test_load_dir_collects_per_file_errors() {
        let ingestor = test_ingestor().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.txt"), "fine").unwrap();
        std::fs::write(dir.path().join("bad.json"), "{nope").unwrap();
        std::fs::write(dir.path().join("ignored.bin"), "skip me").unwrap();

        let report = ingestor.load_dir(dir.path(), false).await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.total, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("bad.json"));
    }
}
