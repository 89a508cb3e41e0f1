use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hippocrates_core::{
    ConsultationRuntime, DialogueConfig, GenerationError, GenerationService, OutputSchema, Prompt,
    QuestionEngine, RetrievalConfig, Retriever,
};
use hippocrates_knowledge::ingest::entries_to_chunks;
use hippocrates_knowledge::{load_knowledge_base, InMemoryKnowledgeStore, StubEmbeddingProvider};
use hippocrates_schema::{ConfidenceBand, Phase, TurnReply};
use serde_json::{json, Value};

/// Accepts the engine's structure verbatim.
struct PassThrough;

#[async_trait]
impl GenerationService for PassThrough {
    async fn generate(&self, _prompt: &Prompt, schema: &OutputSchema) -> Result<Value, GenerationError> {
        Ok(match schema {
            OutputSchema::FollowUp => json!({"question": "Anything else?", "options": ["Yes", "No"]}),
            OutputSchema::Differential { allowed } => json!({
                "candidates": allowed.iter().map(|c| json!({"condition": c})).collect::<Vec<_>>()
            }),
        })
    }
}

fn shipped_knowledge_base() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/knowledge_base.json")
}

#[tokio::test]
async fn strep_presentation_against_shipped_knowledge_base() -> Result<()> {
    let entries = load_knowledge_base(&shipped_knowledge_base())?;
    let (chunks, rejected) = entries_to_chunks(&entries);
    assert!(rejected.is_empty());
    let conditions: Vec<String> = chunks.iter().map(|c| c.tags.condition.clone()).collect();

    let store = InMemoryKnowledgeStore::build(chunks, Arc::new(StubEmbeddingProvider::new(64))).await?;
    let runtime = Arc::new(
        ConsultationRuntime::new(
            Retriever::new(Arc::new(store), RetrievalConfig::default()),
            QuestionEngine::default(),
            Arc::new(PassThrough),
            DialogueConfig::default(),
        )
        .with_conditions(conditions),
    );

    let mut consultation = runtime.start();
    let output = consultation
        .handle_turn("sore throat, fever 101.5°F, no cough, swollen lymph nodes")
        .await?;

    assert_eq!(output.phase, Phase::Reporting);
    assert!(output.red_flags.is_empty());
    let TurnReply::DifferentialDiagnosis { candidates, .. } = &output.reply else {
        panic!("expected a differential, got {:?}", output.reply);
    };
    assert_eq!(candidates[0].condition, "Strep Pharyngitis");
    assert_eq!(candidates[0].band, ConfidenceBand::High);
    assert!(!candidates[0].citations.is_empty());
    assert!(candidates.iter().all(|c| !c.citations.is_empty()));
    Ok(())
}
