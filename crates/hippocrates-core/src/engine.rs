//! Question/diagnosis engine: decides each turn whether to ask one more
//! question or report a differential.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use hippocrates_schema::{ConfidenceBand, DiagnosisCandidate, Phase, RedFlagWarning, ScoredChunk};

use crate::config::EngineConfig;
use crate::dialogue::{DialogueState, FindingStatus};
use crate::lexicon::Lexicon;
use crate::ranking::{rank_candidates, RankedCandidate};

pub const ANSWER_OPTIONS: [&str; 3] = ["Yes", "No", "Not sure"];

pub const CAVEAT_TURN_CAP: &str = "The question limit for this consultation was reached before \
the evidence clearly separated the candidates, so confidence is capped at Medium.";
pub const CAVEAT_QUESTIONS_EXHAUSTED: &str = "There are no further questions that would \
separate these candidates, so confidence is capped at Medium.";
pub const CAVEAT_NO_CANDIDATES: &str = "The available information does not match any condition \
in the knowledge base. Please consult a clinician.";

#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    FollowUp {
        symptom: String,
        question: String,
        options: Vec<String>,
    },
    Differential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub phase: Phase,
    pub action: NextAction,
    /// Ranked, cited candidates, best first.
    pub candidates: Vec<DiagnosisCandidate>,
    pub caveats: Vec<String>,
    /// Reporting was forced before the evidence separated the candidates.
    pub forced: bool,
}

impl Decision {
    pub fn asked_symptom(&self) -> Option<&str> {
        match &self.action {
            NextAction::FollowUp { symptom, .. } => Some(symptom),
            NextAction::Differential => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QuestionScore {
    gain: usize,
    red_flag_symptom: bool,
    red_flag_conditions: usize,
    best_rank: Reverse<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionEngine {
    config: EngineConfig,
    lexicon: Lexicon,
}

impl QuestionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            lexicon: Lexicon,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn decide(&self, state: &DialogueState, hits: &[ScoredChunk]) -> Decision {
        let ranked = rank_candidates(state, hits, &self.lexicon, &self.config.bands);
        let top = ranked.first().map(|c| c.candidate.score);
        let second = ranked.get(1).map(|c| c.candidate.score).unwrap_or(0.0);

        if let Some(top) = top {
            if top >= self.config.report_threshold && top - second >= self.config.separation_threshold {
                tracing::debug!(top, second, "evidence separated; reporting");
                return self.report(&ranked, false, None);
            }
        }

        if state.turn_cap_reached() {
            tracing::info!(
                turns = state.patient_turns(),
                cap = state.turn_cap(),
                "turn cap reached; forcing a differential"
            );
            return self.report(&ranked, true, Some(CAVEAT_TURN_CAP));
        }

        let phase = match top {
            Some(score) if score >= self.config.confirming_threshold => Phase::Confirming,
            _ => Phase::Gathering,
        };

        let symptom = if ranked.is_empty() {
            self.next_screening_symptom(state)
        } else {
            self.best_question(state, &ranked)
        };

        match symptom {
            Some(symptom) => Decision {
                phase,
                action: NextAction::FollowUp {
                    question: self.lexicon.question_for(&symptom),
                    symptom,
                    options: ANSWER_OPTIONS.iter().map(|o| o.to_string()).collect(),
                },
                candidates: ranked.into_iter().map(|c| c.candidate).collect(),
                caveats: Vec::new(),
                forced: false,
            },
            None => self.report(&ranked, true, Some(CAVEAT_QUESTIONS_EXHAUSTED)),
        }
    }

    fn report(&self, ranked: &[RankedCandidate], forced: bool, caveat: Option<&str>) -> Decision {
        let mut candidates: Vec<DiagnosisCandidate> = ranked
            .iter()
            .filter(|c| c.candidate.score > 0.0)
            .map(|c| c.candidate.clone())
            .collect();
        let mut caveats = Vec::new();
        if forced {
            for candidate in &mut candidates {
                candidate.band = candidate.band.min(ConfidenceBand::Medium);
            }
        }
        if candidates.is_empty() {
            caveats.push(CAVEAT_NO_CANDIDATES.to_string());
        } else if let Some(caveat) = caveat {
            caveats.push(caveat.to_string());
        }
        Decision {
            phase: Phase::Reporting,
            action: NextAction::Differential,
            candidates,
            caveats,
            forced,
        }
    }

    /// The unknown, unasked feature that splits the most candidate pairs.
    fn best_question(&self, state: &DialogueState, ranked: &[RankedCandidate]) -> Option<String> {
        let features: BTreeSet<&String> = ranked
            .iter()
            .flat_map(|c| c.profile.features())
            .filter(|f| !state.is_known(f) && !state.asked().contains(f.as_str()))
            .collect();

        features
            .into_iter()
            .map(|feature| {
                let listing: Vec<usize> = ranked
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.profile.has_feature(feature))
                    .map(|(rank, _)| rank)
                    .collect();
                let with = listing.len();
                let score = QuestionScore {
                    gain: with * (ranked.len() - with),
                    red_flag_symptom: self.lexicon.is_red_flag(feature),
                    red_flag_conditions: listing
                        .iter()
                        .filter(|&&rank| !ranked[rank].candidate.red_flags.is_empty())
                        .count(),
                    best_rank: Reverse(listing.first().copied().unwrap_or(usize::MAX)),
                };
                (score, Reverse(feature))
            })
            .max()
            .map(|(_, Reverse(feature))| feature.clone())
    }

    fn next_screening_symptom(&self, state: &DialogueState) -> Option<String> {
        self.lexicon
            .screening_order()
            .iter()
            .find(|key| !state.is_known(key) && !state.asked().contains(**key))
            .map(|key| key.to_string())
    }
}

/// Warnings for every confirmed danger sign, in the order they were reported.
pub fn red_flag_warnings(state: &DialogueState, lexicon: &Lexicon) -> Vec<RedFlagWarning> {
    state
        .present_symptoms()
        .into_iter()
        .filter_map(|key| {
            lexicon.red_flag_message(key).map(|message| RedFlagWarning {
                symptom: key.to_string(),
                message: message.to_string(),
            })
        })
        .collect()
}

/// True when the patient has confirmed a danger sign.
pub fn has_red_flag(state: &DialogueState, lexicon: &Lexicon) -> bool {
    state
        .findings()
        .iter()
        .any(|(key, f)| f.status == FindingStatus::Present && lexicon.is_red_flag(key))
}
