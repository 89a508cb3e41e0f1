use std::sync::Arc;

use anyhow::Result;
use hippocrates_knowledge::{
    ingest_knowledge_base, KnowledgeStore, SqliteKnowledgeStore, StubEmbeddingProvider,
};
use tempfile::TempDir;

const KNOWLEDGE_BASE: &str = r#"[
  {
    "condition": "Strep Pharyngitis",
    "symptoms": ["Sore throat", "Fever", "Swollen lymph nodes", "Tonsillar exudate"],
    "absent_symptoms": ["Cough"],
    "key_factors": {"onset": "Sudden", "age_group": "Children 5-15"},
    "diagnostic_tests": ["Rapid Strep Test", "Throat culture"],
    "differential": ["Viral Pharyngitis", "Infectious Mononucleosis"],
    "source": "CDC Pharyngitis Guidelines"
  },
  {
    "condition": "Common Cold",
    "symptoms": ["Runny nose", "Sneezing", "Sore throat", "Cough"],
    "key_factors": {"onset": "Gradual", "age_group": "All ages"},
    "diagnostic_tests": ["Clinical diagnosis"],
    "differential": ["Allergic Rhinitis", "Influenza"],
    "source": "Mayo Clinic"
  },
  {
    "condition": "Unsourced Rumour",
    "symptoms": ["Sore throat"],
    "key_factors": {"onset": "Unknown", "age_group": "Unknown"},
    "diagnostic_tests": [],
    "differential": []
  }
]"#;

#[tokio::test]
async fn ingest_writes_attributed_entries_only() -> Result<()> {
    let dir = TempDir::new()?;
    let kb = dir.path().join("knowledge_base.json");
    std::fs::write(&kb, KNOWLEDGE_BASE)?;

    let store = SqliteKnowledgeStore::open(
        &dir.path().join("knowledge.db"),
        Arc::new(StubEmbeddingProvider::new(16)),
    )?;
    let report = ingest_knowledge_base(&kb, &store, true).await?;

    assert_eq!(report.loaded, 3);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.rejected, vec!["Unsourced Rumour".to_string()]);
    assert_eq!(store.count().await?, 2);

    let hits = store.search("tonsillar exudate and swollen lymph nodes", 5).await?;
    assert_eq!(hits[0].chunk.tags.condition, "Strep Pharyngitis");
    assert!(hits.iter().all(|h| h.chunk.citation.is_attributed()));
    Ok(())
}

#[tokio::test]
async fn reingest_with_replace_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let kb = dir.path().join("knowledge_base.json");
    std::fs::write(&kb, KNOWLEDGE_BASE)?;
    let store = SqliteKnowledgeStore::open(
        &dir.path().join("knowledge.db"),
        Arc::new(StubEmbeddingProvider::new(16)),
    )?;

    ingest_knowledge_base(&kb, &store, true).await?;
    ingest_knowledge_base(&kb, &store, true).await?;
    assert_eq!(store.count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn ingest_reports_malformed_file() -> Result<()> {
    let dir = TempDir::new()?;
    let kb = dir.path().join("knowledge_base.json");
    std::fs::write(&kb, "{not json")?;
    let store = SqliteKnowledgeStore::open_in_memory(Arc::new(StubEmbeddingProvider::new(4)))?;

    let err = ingest_knowledge_base(&kb, &store, true).await.unwrap_err();
    assert!(err.to_string().contains("failed to parse"));
    Ok(())
}
