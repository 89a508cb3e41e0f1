use std::path::Path;

use anyhow::{Context, Result};
use hippocrates_schema::{ChunkTags, Citation, KnowledgeChunk};
use serde::{Deserialize, Serialize};

use crate::store::{embed_chunks, SqliteKnowledgeStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyFactors {
    #[serde(default)]
    pub onset: String,
    #[serde(default)]
    pub age_group: String,
}

/// One condition record of `knowledge_base.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeEntry {
    pub condition: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub absent_symptoms: Vec<String>,
    #[serde(default)]
    pub key_factors: KeyFactors,
    #[serde(default)]
    pub diagnostic_tests: Vec<String>,
    #[serde(default)]
    pub differential: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub loaded: usize,
    pub inserted: usize,
    /// Conditions rejected for lacking a source.
    pub rejected: Vec<String>,
}

pub fn load_knowledge_base(path: &Path) -> Result<Vec<KnowledgeEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::info!(conditions = entries.len(), path = %path.display(), "loaded knowledge base");
    Ok(entries)
}

pub fn chunk_id(condition: &str) -> String {
    let mut id = String::with_capacity(condition.len());
    let mut last_dash = true;
    for c in condition.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            id.push('-');
            last_dash = true;
        }
    }
    id.trim_end_matches('-').to_string()
}

pub fn render_chunk_text(entry: &KnowledgeEntry) -> String {
    let mut lines = vec![
        format!("Condition: {}", entry.condition),
        format!("Symptoms: {}", entry.symptoms.join(", ")),
    ];
    if !entry.absent_symptoms.is_empty() {
        lines.push(format!(
            "Typically Absent: {}",
            entry.absent_symptoms.join(", ")
        ));
    }
    lines.push(format!(
        "Key Factors: Onset: {}. Age Group: {}.",
        entry.key_factors.onset, entry.key_factors.age_group
    ));
    lines.push(format!(
        "Diagnostic Tests: {}",
        entry.diagnostic_tests.join(", ")
    ));
    lines.push(format!(
        "Differential Diagnosis: {}",
        entry.differential.join(", ")
    ));
    if !entry.red_flags.is_empty() {
        lines.push(format!("Red Flags: {}", entry.red_flags.join(", ")));
    }
    if let Some(source) = &entry.source {
        lines.push(format!("Source: {source}"));
    }
    lines.join("\n")
}

fn normalize_tags(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim().to_lowercase();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Build a chunk from an entry. Entries without a source are rejected.
pub fn entry_to_chunk(entry: &KnowledgeEntry) -> Option<KnowledgeChunk> {
    let source = entry
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    Some(KnowledgeChunk {
        id: chunk_id(&entry.condition),
        text: render_chunk_text(entry),
        citation: Citation::new(
            source,
            entry.title.clone().unwrap_or_else(|| entry.condition.clone()),
        ),
        tags: ChunkTags {
            condition: entry.condition.trim().to_string(),
            symptoms: normalize_tags(&entry.symptoms),
            absent_symptoms: normalize_tags(&entry.absent_symptoms),
            red_flags: entry.red_flags.clone(),
            next_steps: entry.diagnostic_tests.clone(),
        },
        embedding: Vec::new(),
    })
}

/// Split entries into chunks, logging every rejected condition.
pub fn entries_to_chunks(entries: &[KnowledgeEntry]) -> (Vec<KnowledgeChunk>, Vec<String>) {
    let mut chunks = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for entry in entries {
        match entry_to_chunk(entry) {
            Some(chunk) => chunks.push(chunk),
            None => {
                tracing::warn!(condition = %entry.condition, "rejecting knowledge entry without source");
                rejected.push(entry.condition.clone());
            }
        }
    }
    (chunks, rejected)
}

/// Offline ingestion: load, render, embed and write every attributed entry.
pub async fn ingest_knowledge_base(
    path: &Path,
    store: &SqliteKnowledgeStore,
    replace: bool,
) -> Result<IngestReport> {
    let entries = load_knowledge_base(path)?;
    let (chunks, rejected) = entries_to_chunks(&entries);

    let embedder = store.embedder();
    let chunks = embed_chunks(embedder.as_ref(), chunks)
        .await
        .with_context(|| format!("failed to embed chunks with {}", embedder.model_id()))?;

    if replace {
        store.clear().await?;
    }
    let inserted = store.insert_chunks(chunks).await?;
    tracing::info!(
        inserted,
        rejected = rejected.len(),
        model = embedder.model_id(),
        "knowledge base ingested"
    );

    Ok(IngestReport {
        loaded: entries.len(),
        inserted,
        rejected,
    })
}
