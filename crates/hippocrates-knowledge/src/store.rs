use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use hippocrates_schema::{ChunkTags, Citation, KnowledgeChunk, ScoredChunk};
use rusqlite::{params, Connection};
use tokio::task;

use crate::embedding::EmbeddingProvider;
use crate::migrations::run_migrations;
use crate::similarity::{embedding_to_json, json_to_embedding};
use crate::{rank_chunks, KnowledgeError, KnowledgeStore};

async fn embed_query(
    embedder: &dyn EmbeddingProvider,
    query_text: &str,
) -> Result<Option<Vec<f32>>, KnowledgeError> {
    if !embedder.is_semantic() {
        return Ok(None);
    }
    let result = embedder
        .embed(&[query_text.to_string()])
        .await
        .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;
    result
        .embeddings
        .into_iter()
        .next()
        .map(Some)
        .ok_or_else(|| KnowledgeError::Embedding("provider returned no embedding".into()))
}

/// Embed every chunk that does not carry an embedding yet.
pub async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    mut chunks: Vec<KnowledgeChunk>,
) -> Result<Vec<KnowledgeChunk>> {
    let pending: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_empty())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return Ok(chunks);
    }

    let texts: Vec<String> = pending.iter().map(|&i| chunks[i].text.clone()).collect();
    let result = embedder.embed(&texts).await?;
    if result.embeddings.len() != pending.len() {
        return Err(anyhow!(
            "embedding count mismatch: expected {}, got {}",
            pending.len(),
            result.embeddings.len()
        ));
    }
    for (index, embedding) in pending.into_iter().zip(result.embeddings) {
        chunks[index].embedding = embedding;
    }
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InMemoryKnowledgeStore {
    chunks: Arc<Vec<KnowledgeChunk>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl InMemoryKnowledgeStore {
    /// Wrap chunks that already carry embeddings (or will be searched lexically).
    pub fn from_chunks(chunks: Vec<KnowledgeChunk>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            chunks: Arc::new(chunks),
            embedder,
        }
    }

    pub async fn build(
        chunks: Vec<KnowledgeChunk>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let chunks = embed_chunks(embedder.as_ref(), chunks).await?;
        Ok(Self::from_chunks(chunks, embedder))
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search(&self, query_text: &str, k: usize) -> Result<Vec<ScoredChunk>, KnowledgeError> {
        if query_text.trim().is_empty() || k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = embed_query(self.embedder.as_ref(), query_text).await?;
        Ok(rank_chunks(
            query_text,
            query_embedding.as_deref(),
            self.chunks.iter().cloned(),
            k,
        ))
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        Ok(self.chunks.len())
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    db: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteKnowledgeStore {
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    pub fn open_in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    /// Insert or replace chunks. Only the offline ingestion path writes.
    pub async fn insert_chunks(&self, chunks: Vec<KnowledgeChunk>) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let model = self.embedder.model_id().to_string();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now().to_rfc3339();
            for chunk in &chunks {
                let tags = serde_json::to_string(&chunk.tags)?;
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO chunks (
                        id, condition, text, source, title, tags, embedding, embedding_model, ingested_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        chunk.id,
                        chunk.tags.condition,
                        chunk.text,
                        chunk.citation.source,
                        chunk.citation.title,
                        tags,
                        embedding_to_json(&chunk.embedding),
                        model,
                        now,
                    ],
                )?;
            }
            tx.commit()?;
            Ok::<usize, anyhow::Error>(chunks.len())
        })
        .await?
    }

    pub async fn clear(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute("DELETE FROM chunks", [])?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }

    /// True when any stored chunk was embedded by a different model than the
    /// configured provider.
    pub async fn needs_reindex(&self) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let model = self.embedder.model_id().to_string();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let stale: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE embedding_model != ?1",
                [model],
                |row| row.get(0),
            )?;
            Ok::<bool, anyhow::Error>(stale > 0)
        })
        .await?
    }

    pub async fn all_chunks(&self) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| KnowledgeError::Unavailable("failed to lock sqlite connection".into()))?;
            load_chunks(&conn)
        })
        .await
        .map_err(|e| KnowledgeError::Unavailable(e.to_string()))?
    }
}

type ChunkRow = (String, String, String, String, String, String);

fn load_chunks(conn: &Connection) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
    let mut stmt =
        conn.prepare("SELECT id, text, source, title, tags, embedding FROM chunks ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok::<ChunkRow, rusqlite::Error>((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })?;

    let mut chunks = Vec::new();
    for row in rows {
        let (id, text, source, title, tags, embedding) = row?;
        let tags: ChunkTags = serde_json::from_str(&tags).map_err(|e| KnowledgeError::Corrupt {
            id: id.clone(),
            reason: format!("tags: {e}"),
        })?;
        let embedding = json_to_embedding(&embedding).map_err(|e| KnowledgeError::Corrupt {
            id: id.clone(),
            reason: format!("embedding: {e}"),
        })?;
        chunks.push(KnowledgeChunk {
            id,
            text,
            citation: Citation { source, title },
            tags,
            embedding,
        });
    }
    Ok(chunks)
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn search(&self, query_text: &str, k: usize) -> Result<Vec<ScoredChunk>, KnowledgeError> {
        if query_text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = embed_query(self.embedder.as_ref(), query_text).await?;
        let chunks = self.all_chunks().await?;
        let hits = rank_chunks(query_text, query_embedding.as_deref(), chunks, k);
        tracing::debug!(query = query_text, hits = hits.len(), "knowledge search");
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| KnowledgeError::Unavailable("failed to lock sqlite connection".into()))?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok::<usize, KnowledgeError>(count.max(0) as usize)
        })
        .await
        .map_err(|e| KnowledgeError::Unavailable(e.to_string()))?
    }
}
