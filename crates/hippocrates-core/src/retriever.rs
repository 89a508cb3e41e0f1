use std::sync::Arc;

use hippocrates_knowledge::KnowledgeStore;
use hippocrates_schema::ScoredChunk;

use crate::config::RetrievalConfig;
use crate::dialogue::DialogueState;

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub query: Option<String>,
    /// Attributed hits above the score threshold, best first, at most `top_k`.
    pub hits: Vec<ScoredChunk>,
    /// The store could not be reached; the turn proceeds without context.
    pub unavailable: bool,
    pub dropped_uncited: usize,
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn KnowledgeStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> RetrievalConfig {
        self.config
    }

    /// Query text for a dialogue state: confirmed symptoms, then denied ones
    /// as "no X", falling back to the latest patient utterance.
    pub fn query_for(state: &DialogueState) -> Option<String> {
        let mut terms: Vec<String> = state
            .present_symptoms()
            .into_iter()
            .map(str::to_string)
            .collect();
        terms.extend(state.absent_symptoms().into_iter().map(|s| format!("no {s}")));
        if !terms.is_empty() {
            return Some(terms.join(", "));
        }
        state
            .last_patient_utterance()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    pub async fn retrieve(&self, state: &DialogueState) -> Retrieval {
        match Self::query_for(state) {
            Some(query) => self.search(&query).await,
            None => Retrieval::default(),
        }
    }

    /// Search the store. Never fails: an unreachable store yields no hits.
    pub async fn search(&self, query: &str) -> Retrieval {
        let fetch = self.config.top_k.saturating_mul(2).max(self.config.top_k);
        let raw = match self.store.search(query, fetch).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(event = "RetrievalUnavailable", error = %e, "knowledge store search failed");
                return Retrieval {
                    query: Some(query.to_string()),
                    unavailable: true,
                    ..Default::default()
                };
            }
        };

        let mut dropped_uncited = 0;
        let mut hits = Vec::with_capacity(self.config.top_k);
        for hit in raw {
            if !hit.chunk.citation.is_attributed() {
                tracing::warn!(chunk_id = %hit.chunk.id, "dropping retrieval hit without citation");
                dropped_uncited += 1;
                continue;
            }
            if hit.score < self.config.min_score {
                continue;
            }
            if hits.len() < self.config.top_k {
                hits.push(hit);
            }
        }

        tracing::debug!(query, hits = hits.len(), dropped_uncited, "retrieved context");
        Retrieval {
            query: Some(query.to_string()),
            hits,
            unavailable: false,
            dropped_uncited,
        }
    }
}
