//! Query-time retrieval: embed the query, search the index, apply the
//! optional similarity floor.

use anyhow::Result;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

pub struct Retriever {
    index: VectorIndex,
    embeddings: Arc<dyn EmbeddingProvider>,
    default_k: usize,
    min_score: Option<f32>,
}

impl Retriever {
    pub fn new(
        index: VectorIndex,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embeddings,
            default_k: config.default_k,
            min_score: config.min_score,
        }
    }

    /// Return up to `k` chunks most similar to `query`, best first.
    /// When a `min_score` floor is configured, weaker hits are dropped.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        let k = k.unwrap_or(self.default_k);
        let query_vec = embed_query(self.embeddings.as_ref(), query).await?;

        let mut hits = self.index.query(&query_vec, k).await?;
        if let Some(floor) = self.min_score {
            hits.retain(|h| h.similarity_score >= floor);
        }

        tracing::debug!(query_len = query.len(), hits = hits.len(), "retrieval complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddings;
    use crate::migrate::run_migrations;
    use crate::models::ChunkRecord;
    use serde_json::json;
    use sqlx::SqlitePool;

    async fn retriever_with(texts: &[&str], config: RetrievalConfig) -> Retriever {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let index = VectorIndex::new(pool);
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddings::new(128));

        let vecs = embeddings
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let chunks: Vec<ChunkRecord> = texts
            .iter()
            .zip(vecs)
            .enumerate()
            .map(|(i, (text, embedding))| ChunkRecord {
                id: format!("doc_chunk_{}", i),
                document_id: "doc".to_string(),
                filename: "f.txt".to_string(),
                chunk_index: i as i64,
                text: text.to_string(),
                metadata: json!({ "filename": "f.txt" }),
                embedding,
            })
            .collect();
        index.upsert(&chunks).await.unwrap();

        Retriever::new(index, embeddings, &config)
    }

    #[tokio::test]
    async fn test_self_similarity_top_hit() {
        let retriever = retriever_with(
            &["the quick brown fox", "an unrelated zebra text"],
            RetrievalConfig::default(),
        )
        .await;

        let hits = retriever
            .retrieve("the quick brown fox", Some(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "the quick brown fox");
        assert!((hits[0].similarity_score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_min_score_floor_drops_weak_hits() {
        let retriever = retriever_with(
            &["alpha beta gamma", "zebra quantum lattice"],
            RetrievalConfig {
                default_k: 5,
                min_score: Some(0.9),
            },
        )
        .await;

        let hits = retriever.retrieve("alpha beta gamma", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "alpha beta gamma");
    }

    #[tokio::test]
    async fn test_empty_index_yields_no_hits() {
        let retriever = retriever_with(&[], RetrievalConfig::default()).await;
        let hits = retriever.retrieve("anything", None).await.unwrap();
        assert!(hits.is_empty());
    }
}
