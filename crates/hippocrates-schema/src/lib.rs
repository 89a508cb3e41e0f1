use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standing notice attached to every turn output.
pub const DISCLAIMER: &str = "This assistant is an educational proof-of-concept, not a medical device. \
It is not a substitute for professional medical advice, diagnosis, or treatment.";

/// Where a piece of knowledge came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub source: String,
    #[serde(default)]
    pub title: String,
}

impl Citation {
    pub fn new(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
        }
    }

    /// A citation without a source string cannot back a claim.
    pub fn is_attributed(&self) -> bool {
        !self.source.trim().is_empty()
    }
}

/// Condition and symptom tags attached to a chunk at ingestion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkTags {
    pub condition: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Features whose absence supports the condition (e.g. no cough for strep).
    #[serde(default)]
    pub absent_symptoms: Vec<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeChunk {
    pub id: String,
    pub text: String,
    pub citation: Citation,
    pub tags: ChunkTags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// A retrieval hit. Score is a similarity in `[0, 1]`, higher is better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Patient,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn patient(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Patient,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Discrete confidence band. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// Score cut-offs for each band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandThresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            high: 0.6,
            medium: 0.35,
        }
    }
}

impl BandThresholds {
    /// Monotone: a higher score never maps to a lower band.
    pub fn band_for(&self, score: f32) -> ConfidenceBand {
        if score >= self.high {
            ConfidenceBand::High
        } else if score >= self.medium {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedFlagWarning {
    pub symptom: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisCandidate {
    pub condition: String,
    pub score: f32,
    pub band: ConfidenceBand,
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Gathering,
    Confirming,
    Reporting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnReply {
    FollowUpQuestion {
        text: String,
        #[serde(default)]
        options: Vec<String>,
    },
    DifferentialDiagnosis {
        #[serde(default)]
        summary: Option<String>,
        candidates: Vec<DiagnosisCandidate>,
    },
}

impl TurnReply {
    pub fn candidates(&self) -> &[DiagnosisCandidate] {
        match self {
            Self::DifferentialDiagnosis { candidates, .. } => candidates,
            Self::FollowUpQuestion { .. } => &[],
        }
    }

    /// Plain-text rendering recorded in the conversation history.
    pub fn transcript_text(&self) -> String {
        match self {
            Self::FollowUpQuestion { text, .. } => text.clone(),
            Self::DifferentialDiagnosis {
                summary,
                candidates,
            } => {
                let ranked = candidates
                    .iter()
                    .map(|c| format!("{} ({})", c.condition, c.band.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                match summary {
                    Some(summary) if !summary.is_empty() => {
                        format!("{summary} Differential: {ranked}")
                    }
                    _ => format!("Differential: {ranked}"),
                }
            }
        }
    }
}

/// Everything the presentation layer receives for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnOutput {
    pub consultation_id: Uuid,
    pub reply: TurnReply,
    pub phase: Phase,
    #[serde(default)]
    pub red_flags: Vec<RedFlagWarning>,
    #[serde(default)]
    pub caveats: Vec<String>,
    pub disclaimer: String,
}
