use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hippocrates_knowledge::{create_embedding_provider, KnowledgeStore, SqliteKnowledgeStore};
use hippocrates_provider::{register_from_configs, ProviderRegistry};
use hippocrates_schema::{ConversationTurn, DiagnosisCandidate, TurnOutput, TurnReply, DISCLAIMER};
use uuid::Uuid;

use crate::config::{DialogueConfig, HippocratesConfig};
use crate::dialogue::{DialogueState, DialogueTracker};
use crate::engine::{red_flag_warnings, Decision, NextAction, QuestionEngine};
use crate::error::{ConsultationError, GenerationError};
use crate::generation::{generate_with_policy, GenerationOutcome, GenerationService, LlmGenerationService};
use crate::prompt::{build_prompt, GeneratedCandidate, GeneratedOutput};
use crate::retriever::Retriever;

const ATTEMPTS: u32 = 2;

pub const CAVEAT_RETRIEVAL_UNAVAILABLE: &str = "The medical knowledge base could not be reached, \
so this reply is based on the conversation alone.";
pub const CAVEAT_DEGRADED: &str = "The language service did not return a usable answer, so this \
reply uses the assistant's built-in wording and may be less clear than usual.";

/// Components shared by every consultation. Read-only once built.
pub struct ConsultationRuntime {
    retriever: Retriever,
    engine: QuestionEngine,
    generator: Arc<dyn GenerationService>,
    dialogue: DialogueConfig,
    conditions: Vec<String>,
}

impl ConsultationRuntime {
    pub fn new(
        retriever: Retriever,
        engine: QuestionEngine,
        generator: Arc<dyn GenerationService>,
        dialogue: DialogueConfig,
    ) -> Self {
        Self {
            retriever,
            engine,
            generator,
            dialogue,
            conditions: Vec::new(),
        }
    }

    /// Condition names recognised in rule-out statements from the first turn.
    pub fn with_conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.extend(conditions.into_iter().map(Into::into));
        self
    }

    /// Open the ingested store and the configured generation provider.
    /// Relative paths resolve against `root`.
    pub async fn open(config: &HippocratesConfig, root: &Path) -> Result<Self> {
        let main = &config.main;
        let embedder = create_embedding_provider(&main.embedding)?;
        let db_path = root.join(&main.knowledge.db_path);
        let store = SqliteKnowledgeStore::open(&db_path, embedder)
            .with_context(|| format!("failed to open knowledge store: {}", db_path.display()))?;
        if store.needs_reindex().await? {
            tracing::warn!(
                db = %db_path.display(),
                model = %main.embedding.model,
                "stored embeddings come from a different model; re-run ingest"
            );
        }
        let chunks = store.all_chunks().await?;
        if chunks.is_empty() {
            tracing::warn!(db = %db_path.display(), "knowledge store is empty");
        }
        let mut conditions: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !conditions.iter().any(|c| c.eq_ignore_ascii_case(&chunk.tags.condition)) {
                conditions.push(chunk.tags.condition.clone());
            }
        }

        let mut registry = ProviderRegistry::new();
        register_from_configs(&mut registry, &config.providers)?;
        let generator = LlmGenerationService::from_config(&main.generation, &registry)?;
        tracing::info!(
            chunks = chunks.len(),
            conditions = conditions.len(),
            model = %main.generation.model,
            "consultation runtime ready"
        );

        let store: Arc<dyn KnowledgeStore> = Arc::new(store);
        Ok(Self::new(
            Retriever::new(store, main.retrieval),
            QuestionEngine::new(main.engine),
            Arc::new(generator),
            main.dialogue,
        )
        .with_conditions(conditions))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn start(self: &Arc<Self>) -> Consultation {
        Consultation {
            id: Uuid::new_v4(),
            runtime: Arc::clone(self),
            tracker: DialogueTracker::with_conditions(&self.conditions),
            state: DialogueState::new(self.dialogue),
        }
    }
}

/// One patient's consultation. Turns must be handled one at a time.
pub struct Consultation {
    id: Uuid,
    runtime: Arc<ConsultationRuntime>,
    tracker: DialogueTracker,
    state: DialogueState,
}

impl Consultation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &DialogueState {
        &self.state
    }

    /// Run one patient turn. On error the dialogue state is left untouched
    /// and the turn may be retried.
    pub async fn handle_turn(&mut self, text: &str) -> Result<TurnOutput, ConsultationError> {
        let runtime = Arc::clone(&self.runtime);
        let next = self.tracker.update(&self.state, ConversationTurn::patient(text));

        let retrieval = runtime.retriever.retrieve(&next).await;
        self.tracker
            .add_conditions(retrieval.hits.iter().map(|h| h.chunk.tags.condition.as_str()));

        let decision = runtime.engine.decide(&next, &retrieval.hits);
        let red_flags = red_flag_warnings(&next, runtime.engine.lexicon());
        if !red_flags.is_empty() {
            tracing::warn!(
                consultation_id = %self.id,
                red_flags = ?red_flags.iter().map(|w| w.symptom.as_str()).collect::<Vec<_>>(),
                "danger signs reported"
            );
        }

        let (prompt, schema) = build_prompt(&next, &retrieval, &decision);
        let outcome = match generate_with_policy(runtime.generator.as_ref(), &prompt, &schema).await {
            Ok(outcome) => outcome,
            Err(GenerationError::Timeout(_)) => {
                return Err(ConsultationError::GenerationTimeout {
                    attempts: ATTEMPTS,
                    red_flags,
                })
            }
            Err(e) => {
                return Err(ConsultationError::GenerationUnavailable {
                    attempts: ATTEMPTS,
                    reason: e.to_string(),
                    red_flags,
                })
            }
        };

        let mut caveats = Vec::new();
        if retrieval.unavailable {
            caveats.push(CAVEAT_RETRIEVAL_UNAVAILABLE.to_string());
        }
        caveats.extend(decision.caveats.iter().cloned());
        let reply = compose_reply(&decision, outcome, &mut caveats);

        self.state = self.tracker.record_reply(
            &next,
            ConversationTurn::assistant(reply.transcript_text()),
            decision.asked_symptom(),
        );
        tracing::info!(
            consultation_id = %self.id,
            phase = ?decision.phase,
            turn = self.state.patient_turns(),
            candidates = reply.candidates().len(),
            "turn complete"
        );

        Ok(TurnOutput {
            consultation_id: self.id,
            reply,
            phase: decision.phase,
            red_flags,
            caveats,
            disclaimer: DISCLAIMER.to_string(),
        })
    }
}

/// The engine decides what is said; generation only supplies wording and
/// rationale for the candidates the engine already ranked and cited.
fn compose_reply(decision: &Decision, outcome: GenerationOutcome, caveats: &mut Vec<String>) -> TurnReply {
    let generated = match outcome {
        GenerationOutcome::Generated { output, .. } => Some(output),
        GenerationOutcome::Degraded { reason, attempts } => {
            tracing::warn!(reason = %reason, attempts, "using engine output without generated wording");
            caveats.push(CAVEAT_DEGRADED.to_string());
            None
        }
    };

    match &decision.action {
        NextAction::FollowUp {
            question, options, ..
        } => match generated {
            Some(GeneratedOutput::FollowUp {
                question: generated,
                options: generated_options,
            }) => TurnReply::FollowUpQuestion {
                text: generated,
                options: if generated_options.is_empty() {
                    options.clone()
                } else {
                    generated_options
                },
            },
            _ => TurnReply::FollowUpQuestion {
                text: question.clone(),
                options: options.clone(),
            },
        },
        NextAction::Differential => match generated {
            Some(GeneratedOutput::Differential {
                summary,
                candidates,
            }) => TurnReply::DifferentialDiagnosis {
                summary,
                candidates: merge_rationale(&decision.candidates, &candidates),
            },
            _ => TurnReply::DifferentialDiagnosis {
                summary: None,
                candidates: decision.candidates.clone(),
            },
        },
    }
}

fn merge_rationale(ranked: &[DiagnosisCandidate], generated: &[GeneratedCandidate]) -> Vec<DiagnosisCandidate> {
    ranked
        .iter()
        .map(|candidate| {
            let mut candidate = candidate.clone();
            let wording = generated
                .iter()
                .find(|g| g.condition.eq_ignore_ascii_case(&candidate.condition))
                .and_then(|g| g.rationale.clone());
            if let Some(wording) = wording {
                candidate.rationale = Some(wording);
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocrates_schema::{Citation, ConfidenceBand, Phase};

    fn candidate(name: &str) -> DiagnosisCandidate {
        DiagnosisCandidate {
            condition: name.into(),
            score: 0.7,
            band: ConfidenceBand::High,
            citations: vec![Citation::new("CDC", name)],
            red_flags: vec![],
            next_steps: vec!["Rapid strep test".into()],
            rationale: Some("reported fever".into()),
        }
    }

    fn differential(candidates: Vec<DiagnosisCandidate>) -> Decision {
        Decision {
            phase: Phase::Reporting,
            action: NextAction::Differential,
            candidates,
            caveats: vec![],
            forced: false,
        }
    }

    #[test]
    fn generated_rationale_replaces_engine_wording_only() {
        let decision = differential(vec![candidate("Strep Pharyngitis"), candidate("Common Cold")]);
        let outcome = GenerationOutcome::Generated {
            output: GeneratedOutput::Differential {
                summary: Some("Likely strep.".into()),
                candidates: vec![GeneratedCandidate {
                    condition: "Strep Pharyngitis".into(),
                    rationale: Some("Fever without cough fits strep.".into()),
                    next_steps: vec!["Antibiotics now".into()],
                }],
            },
            attempts: 1,
        };
        let mut caveats = Vec::new();
        let reply = compose_reply(&decision, outcome, &mut caveats);
        let candidates = reply.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].rationale.as_deref(), Some("Fever without cough fits strep."));
        assert_eq!(candidates[0].next_steps, vec!["Rapid strep test".to_string()]);
        assert_eq!(candidates[1].rationale.as_deref(), Some("reported fever"));
        assert!(caveats.is_empty());
    }

    #[test]
    fn degraded_follow_up_uses_engine_question() {
        let decision = Decision {
            phase: Phase::Gathering,
            action: NextAction::FollowUp {
                symptom: "cough".into(),
                question: "Do you have a cough?".into(),
                options: vec!["Yes".into(), "No".into()],
            },
            candidates: vec![],
            caveats: vec![],
            forced: false,
        };
        let mut caveats = Vec::new();
        let reply = compose_reply(
            &decision,
            GenerationOutcome::Degraded {
                reason: "malformed".into(),
                attempts: 2,
            },
            &mut caveats,
        );
        assert_eq!(
            reply,
            TurnReply::FollowUpQuestion {
                text: "Do you have a cough?".into(),
                options: vec!["Yes".into(), "No".into()],
            }
        );
        assert_eq!(caveats, vec![CAVEAT_DEGRADED.to_string()]);
    }
}
