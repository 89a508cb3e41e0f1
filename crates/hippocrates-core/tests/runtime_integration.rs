use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use hippocrates_core::{ConsultationError, ConsultationRuntime, HippocratesConfig, MainConfig};
use hippocrates_knowledge::{
    create_embedding_provider, ingest_knowledge_base, EmbeddingBackend, EmbeddingConfig,
    SqliteKnowledgeStore,
};
use hippocrates_provider::{ProviderConfig, ProviderType};
use hippocrates_schema::{ConfidenceBand, Phase, TurnReply};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

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
    "condition": "Infectious Mononucleosis",
    "symptoms": ["Sore throat", "Fever", "Swollen lymph nodes", "Fatigue", "Body aches", "Headache"],
    "key_factors": {"onset": "Gradual", "age_group": "Teens and young adults"},
    "diagnostic_tests": ["Monospot test"],
    "differential": ["Strep Pharyngitis"],
    "source": "Mayo Clinic"
  },
  {
    "condition": "Common Cold",
    "symptoms": ["Runny nose", "Sneezing", "Sore throat", "Cough", "Nasal congestion"],
    "key_factors": {"onset": "Gradual", "age_group": "All ages"},
    "diagnostic_tests": ["Clinical diagnosis"],
    "differential": ["Allergic Rhinitis", "Influenza"],
    "source": "CDC Common Cold"
  }
]"#;

fn mock_chat_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 40}
    })
}

fn config(base_url: &str) -> HippocratesConfig {
    let mut main = MainConfig::default();
    main.knowledge.db_path = "data/knowledge.db".into();
    main.embedding = EmbeddingConfig {
        backend: EmbeddingBackend::Stub,
        dimensions: 32,
        ..Default::default()
    };
    main.generation.model = "lab/llama3".into();
    main.generation.timeout_secs = 5;
    HippocratesConfig {
        main,
        providers: vec![ProviderConfig::new("lab", ProviderType::Custom).with_base_url(base_url)],
    }
}

async fn ingest(root: &Path, config: &HippocratesConfig) -> Result<()> {
    let kb = root.join("knowledge_base.json");
    std::fs::write(&kb, KNOWLEDGE_BASE)?;
    let embedder = create_embedding_provider(&config.main.embedding)?;
    let store = SqliteKnowledgeStore::open(&root.join(&config.main.knowledge.db_path), embedder)?;
    let report = ingest_knowledge_base(&kb, &store, true).await?;
    assert_eq!(report.inserted, 3);
    Ok(())
}

#[tokio::test]
async fn full_turn_over_sqlite_store_and_http_provider() -> Result<()> {
    let server = MockServer::start().await;
    let reply = r#"Here you go:
{"summary": "Findings fit a bacterial throat infection.",
 "candidates": [
   {"condition": "Strep Pharyngitis", "rationale": "Fever and swollen nodes without cough.", "next_steps": ["Rapid Strep Test"]},
   {"condition": "Scarlet Fever", "rationale": "Not in the list."}
 ]}"#;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "llama3",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response(reply)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let config = config(&server.uri());
    ingest(dir.path(), &config).await?;

    let runtime = Arc::new(ConsultationRuntime::open(&config, dir.path()).await?);
    let mut consultation = runtime.start();
    let output = consultation
        .handle_turn("sore throat, fever 101.5F, no cough, swollen lymph nodes")
        .await?;

    assert_eq!(output.phase, Phase::Reporting);
    let TurnReply::DifferentialDiagnosis { summary, candidates } = &output.reply else {
        panic!("expected a differential, got {:?}", output.reply);
    };
    assert_eq!(summary.as_deref(), Some("Findings fit a bacterial throat infection."));
    assert_eq!(candidates[0].condition, "Strep Pharyngitis");
    assert_eq!(candidates[0].band, ConfidenceBand::High);
    assert_eq!(
        candidates[0].rationale.as_deref(),
        Some("Fever and swollen nodes without cough.")
    );
    assert_eq!(candidates[0].citations[0].source, "CDC Pharyngitis Guidelines");
    assert!(candidates.iter().all(|c| c.condition != "Scarlet Fever"));
    Ok(())
}

#[tokio::test]
async fn provider_outage_is_retried_once_then_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let config = config(&server.uri());
    ingest(dir.path(), &config).await?;

    let runtime = Arc::new(ConsultationRuntime::open(&config, dir.path()).await?);
    let mut consultation = runtime.start();
    let err = consultation
        .handle_turn("I have a sore throat")
        .await
        .expect_err("provider is down");

    assert!(matches!(err, ConsultationError::GenerationUnavailable { attempts: 2, .. }));
    assert_eq!(consultation.state().patient_turns(), 0);
    Ok(())
}

#[tokio::test]
async fn rule_out_works_from_the_first_turn() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_chat_response(
            r#"{"question": "Do you have a cough?", "options": ["Yes", "No"]}"#,
        )))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let config = config(&server.uri());
    ingest(dir.path(), &config).await?;

    let runtime = Arc::new(ConsultationRuntime::open(&config, dir.path()).await?);
    let mut consultation = runtime.start();
    let output = consultation
        .handle_turn("sore throat, mononucleosis was ruled out last week")
        .await?;

    assert!(consultation.state().is_ruled_out("Infectious Mononucleosis"));
    assert!(output
        .reply
        .candidates()
        .iter()
        .all(|c| c.condition != "Infectious Mononucleosis"));
    Ok(())
}
