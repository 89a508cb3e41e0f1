//! Prompt assembly and output-schema validation for the generation service.

use hippocrates_schema::{Citation, ConversationTurn, DiagnosisCandidate};
use serde::Deserialize;
use serde_json::Value;

use crate::dialogue::DialogueState;
use crate::engine::{Decision, NextAction};
use crate::error::GenerationError;
use crate::retriever::Retrieval;

pub const SYSTEM_PROMPT: &str = "You are Hippocrates AI, a meticulous and cautious medical assistant \
for educational use. Base every statement only on the material inside <medical_context> and on what \
the patient has said. Never invent conditions, sources or test results. Ask one clarifying question at \
a time. Keep wording plain and calm. Remind the patient that you are an AI assistant and not a \
substitute for a clinician. Reply with a single JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnippet {
    pub text: String,
    pub citation: Citation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub snippets: Vec<ContextSnippet>,
    pub state_summary: String,
    pub history: Vec<ConversationTurn>,
    pub instruction: String,
    /// Set on a retry after a malformed reply.
    pub correction: Option<String>,
}

impl Prompt {
    pub fn render_user(&self) -> String {
        let mut out = String::from("<medical_context>\n");
        if self.snippets.is_empty() {
            out.push_str("(no reference material retrieved)\n");
        }
        for (i, snippet) in self.snippets.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n", i + 1, snippet.text.trim()));
            if snippet.citation.title.is_empty() {
                out.push_str(&format!("Cited from: {}\n", snippet.citation.source));
            } else {
                out.push_str(&format!(
                    "Cited from: {} ({})\n",
                    snippet.citation.source, snippet.citation.title
                ));
            }
        }
        out.push_str("</medical_context>\n\n<patient_state>\n");
        out.push_str(&self.state_summary);
        out.push_str("\n</patient_state>\n\n<conversation>\n");
        for turn in &self.history {
            out.push_str(&format!("{}: {}\n", turn.speaker.as_str(), turn.text));
        }
        out.push_str("</conversation>\n\n<task>\n");
        out.push_str(&self.instruction);
        out.push_str("\n</task>\n");
        if let Some(correction) = &self.correction {
            out.push_str("\n<correction>\nYour previous reply was rejected: ");
            out.push_str(correction);
            out.push_str(". Reply again with exactly the JSON object described in <task>.\n</correction>\n");
        }
        out
    }

    pub fn with_correction(&self, reason: &str) -> Self {
        Self {
            correction: Some(reason.to_string()),
            ..self.clone()
        }
    }

    /// Half the snippets (best first) and the most recent half of the history.
    pub fn shortened(&self) -> Self {
        let keep_history = self.history.len() / 2;
        Self {
            snippets: self.snippets[..self.snippets.len() / 2].to_vec(),
            history: self.history[self.history.len() - keep_history..].to_vec(),
            ..self.clone()
        }
    }
}

/// Shape the generated JSON must have.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSchema {
    FollowUp,
    /// Candidates may only name conditions in `allowed`.
    Differential { allowed: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCandidate {
    pub condition: String,
    pub rationale: Option<String>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedOutput {
    FollowUp {
        question: String,
        options: Vec<String>,
    },
    Differential {
        summary: Option<String>,
        candidates: Vec<GeneratedCandidate>,
    },
}

#[derive(Deserialize)]
struct RawFollowUp {
    question: String,
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Deserialize)]
struct RawCandidate {
    condition: String,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
}

#[derive(Deserialize)]
struct RawDifferential {
    #[serde(default)]
    summary: Option<String>,
    candidates: Vec<RawCandidate>,
}

impl OutputSchema {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::FollowUp => {
                r#"{"question": "<one question for the patient>", "options": ["Yes", "No", "Not sure"]}"#
            }
            Self::Differential { .. } => {
                r#"{"summary": "<two or three sentences>", "candidates": [{"condition": "<name from the list>", "rationale": "<why, citing the context>", "next_steps": ["<step>"]}]}"#
            }
        }
    }

    pub fn validate(&self, value: &Value) -> Result<GeneratedOutput, GenerationError> {
        match self {
            Self::FollowUp => {
                let raw: RawFollowUp = serde_json::from_value(value.clone())
                    .map_err(|e| GenerationError::Malformed(e.to_string()))?;
                let question = raw.question.trim().to_string();
                if question.is_empty() {
                    return Err(GenerationError::Malformed("question is empty".into()));
                }
                Ok(GeneratedOutput::FollowUp {
                    question,
                    options: raw
                        .options
                        .into_iter()
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect(),
                })
            }
            Self::Differential { allowed } => {
                let raw: RawDifferential = serde_json::from_value(value.clone())
                    .map_err(|e| GenerationError::Malformed(e.to_string()))?;
                let candidates = raw
                    .candidates
                    .into_iter()
                    .filter_map(|c| {
                        let matched = allowed
                            .iter()
                            .find(|a| a.eq_ignore_ascii_case(c.condition.trim()));
                        match matched {
                            Some(name) => Some(GeneratedCandidate {
                                condition: name.clone(),
                                rationale: c.rationale.filter(|r| !r.trim().is_empty()),
                                next_steps: c.next_steps,
                            }),
                            None => {
                                tracing::warn!(
                                    condition = %c.condition,
                                    "suppressing generated condition outside the ranked candidates"
                                );
                                None
                            }
                        }
                    })
                    .collect();
                Ok(GeneratedOutput::Differential {
                    summary: raw.summary.filter(|s| !s.trim().is_empty()),
                    candidates,
                })
            }
        }
    }
}

fn differential_instruction(candidates: &[DiagnosisCandidate], schema: &OutputSchema) -> String {
    let listed = candidates
        .iter()
        .map(|c| {
            let sources = c
                .citations
                .iter()
                .map(|s| s.source.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            format!(
                "- {} (confidence {}, sources: {})",
                c.condition,
                c.band.as_str(),
                sources
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let listed = if listed.is_empty() {
        "(none)".to_string()
    } else {
        listed
    };
    format!(
        "Present the differential diagnosis below, in this order. Mention only these conditions and \
explain each one using the findings and the context.\n{listed}\nRespond with JSON: {}",
        schema.describe()
    )
}

/// Build the prompt and expected schema for the engine's decision.
pub fn build_prompt(state: &DialogueState, retrieval: &Retrieval, decision: &Decision) -> (Prompt, OutputSchema) {
    let (instruction, schema) = match &decision.action {
        NextAction::FollowUp {
            symptom, question, ..
        } => {
            let schema = OutputSchema::FollowUp;
            let instruction = format!(
                "Ask the patient exactly one clarifying question about: {symptom}. \
A suitable wording is: \"{question}\". Offer short answer options.\nRespond with JSON: {}",
                schema.describe()
            );
            (instruction, schema)
        }
        NextAction::Differential => {
            let schema = OutputSchema::Differential {
                allowed: decision.candidates.iter().map(|c| c.condition.clone()).collect(),
            };
            (differential_instruction(&decision.candidates, &schema), schema)
        }
    };

    let prompt = Prompt {
        system: SYSTEM_PROMPT.to_string(),
        snippets: retrieval
            .hits
            .iter()
            .map(|hit| ContextSnippet {
                text: hit.chunk.text.clone(),
                citation: hit.chunk.citation.clone(),
            })
            .collect(),
        state_summary: state.summary(),
        history: state.trimmed_history(),
        instruction,
        correction: None,
    };
    (prompt, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prompt(snippets: usize, turns: usize) -> Prompt {
        Prompt {
            system: SYSTEM_PROMPT.into(),
            snippets: (0..snippets)
                .map(|i| ContextSnippet {
                    text: format!("Condition: C{i}"),
                    citation: Citation::new("CDC", format!("C{i}")),
                })
                .collect(),
            state_summary: "Reported symptoms: fever".into(),
            history: (0..turns).map(|i| ConversationTurn::patient(format!("turn {i}"))).collect(),
            instruction: "Ask one question.".into(),
            correction: None,
        }
    }

    #[test]
    fn shortened_halves_context_and_keeps_recent_turns() {
        let short = prompt(5, 6).shortened();
        assert_eq!(short.snippets.len(), 2);
        assert_eq!(short.snippets[0].text, "Condition: C0");
        let texts: Vec<_> = short.history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["turn 3", "turn 4", "turn 5"]);
    }

    #[test]
    fn render_includes_citations_and_correction() {
        let rendered = prompt(1, 1).with_correction("missing field `question`").render_user();
        assert!(rendered.contains("[1] Condition: C0"));
        assert!(rendered.contains("Cited from: CDC (C0)"));
        assert!(rendered.contains("patient: turn 0"));
        assert!(rendered.contains("<correction>"));
        assert!(!prompt(0, 0).render_user().contains("<correction>"));
    }

    #[test]
    fn follow_up_requires_a_question() {
        let schema = OutputSchema::FollowUp;
        let ok = schema
            .validate(&json!({"question": " Do you have a cough? ", "options": ["Yes", ""]}))
            .unwrap();
        assert_eq!(
            ok,
            GeneratedOutput::FollowUp {
                question: "Do you have a cough?".into(),
                options: vec!["Yes".into()],
            }
        );
        assert!(matches!(
            schema.validate(&json!({"question": "  "})),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            schema.validate(&json!({"text": "hi"})),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn differential_drops_conditions_outside_the_list() {
        let schema = OutputSchema::Differential {
            allowed: vec!["Strep Pharyngitis".into(), "Common Cold".into()],
        };
        let output = schema
            .validate(&json!({
                "summary": "Bacterial infection is most likely.",
                "candidates": [
                    {"condition": "strep pharyngitis", "rationale": "fever, no cough", "next_steps": ["Rapid strep test"]},
                    {"condition": "Scarlet Fever", "rationale": "made up"}
                ]
            }))
            .unwrap();
        let GeneratedOutput::Differential { candidates, summary } = output else {
            panic!("expected differential");
        };
        assert_eq!(summary.as_deref(), Some("Bacterial infection is most likely."));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].condition, "Strep Pharyngitis");

        assert!(matches!(
            schema.validate(&json!({"summary": "no list"})),
            Err(GenerationError::Malformed(_))
        ));
    }
}
