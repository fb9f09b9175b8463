//! SQLite-backed vector index.
//!
//! Chunks live in the `kb_chunks` table with their embeddings stored as
//! little-endian f32 BLOBs. Queries are brute-force: every embedding is
//! scored with a dot product against the (normalized) query vector, so the
//! score is cosine similarity. Ties keep insertion order via rowid.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, dot, vec_to_blob};
use crate::models::{ChunkRecord, RetrievedChunk};

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a batch of chunks in one transaction. Embeddings
    /// are expected to be normalized already.
    pub async fn upsert(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().timestamp_millis();

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO kb_chunks
                    (id, document_id, filename, chunk_index, text, metadata_json, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.filename)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.metadata.to_string())
            .bind(vec_to_blob(&chunk.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Return the `k` nearest chunks by cosine similarity, best first.
    /// An empty index returns an empty vector, never an error.
    pub async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            "SELECT text, metadata_json, embedding FROM kb_chunks ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<RetrievedChunk> = Vec::with_capacity(rows.len());
        for row in rows {
            let text: String = row.get("text");
            let metadata_json: String = row.get("metadata_json");
            let blob: Vec<u8> = row.get("embedding");

            let embedding = blob_to_vec(&blob);
            let score = dot(query_vec, &embedding);
            let metadata =
                serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);

            scored.push(RetrievedChunk {
                content: text,
                metadata,
                similarity_score: score,
            });
        }

        // Stable sort keeps rowid order among equal scores.
        scored.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Purge every chunk ingested under `filename`, across all document
    /// versions. Returns the number of rows removed.
    pub async fn delete_by_filename(&self, filename: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kb_chunks WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove specific chunks by id.
    pub async fn delete_ids(&self, ids: &[String]) -> Result<u64> {
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM kb_chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Wipe the whole index.
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kb_chunks")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kb_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
