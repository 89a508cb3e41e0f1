//! Read-only medical knowledge store and the offline ingestion that fills it.

pub mod embedding;
pub mod ingest;
pub mod migrations;
pub mod similarity;
pub mod store;

use std::cmp::Ordering;

use async_trait::async_trait;
use hippocrates_schema::{KnowledgeChunk, ScoredChunk};
use thiserror::Error;

pub use embedding::{
    create_embedding_provider, EmbeddingBackend, EmbeddingConfig, EmbeddingProvider,
    EmbeddingResult, OllamaEmbeddingProvider, OpenAiEmbeddingProvider, StubEmbeddingProvider,
};
pub use ingest::{ingest_knowledge_base, load_knowledge_base, IngestReport, KnowledgeEntry};
pub use store::{InMemoryKnowledgeStore, SqliteKnowledgeStore};

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),
    #[error("query embedding failed: {0}")]
    Embedding(String),
    #[error("knowledge storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("corrupt chunk record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Nearest-neighbour search over ingested chunks. Implementations are
/// read-only on the request path.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Up to `k` chunks ordered by descending similarity.
    async fn search(&self, query_text: &str, k: usize) -> Result<Vec<ScoredChunk>, KnowledgeError>;

    async fn count(&self) -> Result<usize, KnowledgeError>;
}

/// Score chunks against a query, by embedding when one is given and by term
/// overlap otherwise. Ties fall back to chunk id so results are stable.
pub(crate) fn rank_chunks(
    query_text: &str,
    query_embedding: Option<&[f32]>,
    chunks: impl IntoIterator<Item = KnowledgeChunk>,
    k: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = match query_embedding {
                Some(query) => similarity::cosine_similarity(query, &chunk.embedding),
                None => similarity::lexical_score(query_text, &chunk.text),
            };
            ScoredChunk { chunk, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(k);
    scored
}
