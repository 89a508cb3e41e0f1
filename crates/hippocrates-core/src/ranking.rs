//! Deterministic candidate ranking from dialogue findings and retrieved
//! evidence. No generation service is involved.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use hippocrates_schema::{BandThresholds, Citation, DiagnosisCandidate, ScoredChunk};

use crate::dialogue::{DialogueState, FindingStatus};
use crate::lexicon::Lexicon;

const CLEAN_WEIGHT: f32 = 1.0;
/// A feature that was contradicted and then restated.
const REVISED_WEIGHT: f32 = 0.75;
/// What remains of an earlier statement after it was contradicted.
const RESIDUAL_WEIGHT: f32 = 0.25;
const REVISED_DENIAL_WEIGHT: f32 = 0.5;
const DENIAL_PENALTY: f32 = 0.5;

/// Defining features of a condition as described by a single chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub symptoms: BTreeSet<String>,
    pub absent_features: BTreeSet<String>,
}

impl FeatureSet {
    fn len(&self) -> usize {
        self.symptoms.len() + self.absent_features.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the knowledge base says about one condition in this turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionProfile {
    pub condition: String,
    /// Symptoms expected with the condition across all chunks (canonical keys).
    pub symptoms: BTreeSet<String>,
    /// Symptoms whose absence supports the condition.
    pub absent_features: BTreeSet<String>,
    /// One entry per cited chunk; coverage is scored against each separately.
    pub feature_sets: Vec<FeatureSet>,
    pub red_flags: Vec<String>,
    pub next_steps: Vec<String>,
    pub citations: Vec<Citation>,
    pub evidence_scores: Vec<f32>,
}

impl ConditionProfile {
    pub fn features(&self) -> impl Iterator<Item = &String> {
        self.symptoms.iter().chain(self.absent_features.iter())
    }

    pub fn has_feature(&self, key: &str) -> bool {
        self.symptoms.contains(key) || self.absent_features.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: DiagnosisCandidate,
    pub profile: ConditionProfile,
    /// Patient turn of the earliest confirmed match; `usize::MAX` when none.
    pub earliest_match: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreParts {
    pub coverage: f32,
    pub evidence: f32,
    pub denial: f32,
}

impl ScoreParts {
    pub fn score(&self) -> f32 {
        (self.coverage * (0.6 + 0.4 * self.evidence) - DENIAL_PENALTY * self.denial).clamp(0.0, 1.0)
    }
}

/// Group retrieved chunks into one profile per condition, best evidence first.
pub fn build_profiles(hits: &[ScoredChunk], lexicon: &Lexicon) -> Vec<ConditionProfile> {
    let mut order: Vec<String> = Vec::new();
    let mut profiles: BTreeMap<String, ConditionProfile> = BTreeMap::new();

    for hit in hits {
        let tags = &hit.chunk.tags;
        let name = tags.condition.trim();
        if name.is_empty() {
            continue;
        }
        let key = name.to_lowercase();
        let profile = profiles.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            ConditionProfile {
                condition: name.to_string(),
                symptoms: BTreeSet::new(),
                absent_features: BTreeSet::new(),
                feature_sets: Vec::new(),
                red_flags: Vec::new(),
                next_steps: Vec::new(),
                citations: Vec::new(),
                evidence_scores: Vec::new(),
            }
        });

        let features = FeatureSet {
            symptoms: tags.symptoms.iter().map(|s| lexicon.canonical_or_raw(s)).collect(),
            absent_features: tags
                .absent_symptoms
                .iter()
                .map(|s| lexicon.canonical_or_raw(s))
                .collect(),
        };
        profile.symptoms.extend(features.symptoms.iter().cloned());
        profile
            .absent_features
            .extend(features.absent_features.iter().cloned());
        push_unique(&mut profile.red_flags, &tags.red_flags);
        push_unique(&mut profile.next_steps, &tags.next_steps);
        if hit.chunk.citation.is_attributed() {
            if !profile.citations.contains(&hit.chunk.citation) {
                profile.citations.push(hit.chunk.citation.clone());
            }
            if !features.is_empty() && !profile.feature_sets.contains(&features) {
                profile.feature_sets.push(features);
            }
        }
        profile.evidence_scores.push(hit.score.clamp(0.0, 1.0));
    }

    order
        .into_iter()
        .filter_map(|key| profiles.remove(&key))
        .collect()
}

fn push_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.iter().any(|v| v.eq_ignore_ascii_case(value)) {
            target.push(value.clone());
        }
    }
}

fn feature_parts(features: &FeatureSet, state: &DialogueState) -> (f32, f32) {
    let total = features.len();
    if total == 0 {
        return (0.0, 0.0);
    }

    let mut matched = 0.0_f32;
    let mut denied = 0.0_f32;
    let mut tally = |key: &str, expected: FindingStatus| {
        let Some(finding) = state.finding(key) else {
            return;
        };
        match (finding.status == expected, finding.is_revised()) {
            (true, false) => matched += CLEAN_WEIGHT,
            (true, true) => matched += REVISED_WEIGHT,
            (false, false) => denied += CLEAN_WEIGHT,
            (false, true) => {
                denied += REVISED_DENIAL_WEIGHT;
                matched += RESIDUAL_WEIGHT;
            }
        }
    };
    for symptom in &features.symptoms {
        tally(symptom, FindingStatus::Present);
    }
    for feature in &features.absent_features {
        tally(feature, FindingStatus::Absent);
    }
    (matched / total as f32, denied / total as f32)
}

/// Score one profile against the dialogue state.
///
/// Evidence is the noisy-OR over every supporting chunk; coverage and denial
/// come from the cited chunk whose feature set scores best. Adding a chunk
/// never lowers the score.
pub fn score_profile(profile: &ConditionProfile, state: &DialogueState) -> ScoreParts {
    let evidence = 1.0
        - profile
            .evidence_scores
            .iter()
            .fold(1.0_f32, |acc, s| acc * (1.0 - s.clamp(0.0, 1.0)));
    let evidence = evidence.clamp(0.0, 1.0);

    let mut best = ScoreParts {
        evidence,
        ..ScoreParts::default()
    };
    for features in &profile.feature_sets {
        let (coverage, denial) = feature_parts(features, state);
        let parts = ScoreParts {
            coverage,
            evidence,
            denial,
        };
        let better = parts.score() > best.score()
            || (parts.score() == best.score() && parts.coverage > best.coverage);
        if better {
            best = parts;
        }
    }
    best
}

fn earliest_match(profile: &ConditionProfile, state: &DialogueState) -> usize {
    profile
        .symptoms
        .iter()
        .filter_map(|s| state.finding(s))
        .filter(|f| f.status == FindingStatus::Present)
        .chain(
            profile
                .absent_features
                .iter()
                .filter_map(|s| state.finding(s))
                .filter(|f| f.status == FindingStatus::Absent),
        )
        .map(|f| f.established_at)
        .min()
        .unwrap_or(usize::MAX)
}

fn rationale(profile: &ConditionProfile, state: &DialogueState) -> String {
    let with = |keys: &BTreeSet<String>, status: FindingStatus| -> Vec<String> {
        keys.iter()
            .filter(|k| state.finding(k).is_some_and(|f| f.status == status))
            .cloned()
            .collect()
    };
    let mut parts = Vec::new();
    let supporting = with(&profile.symptoms, FindingStatus::Present);
    if !supporting.is_empty() {
        parts.push(format!("reported {}", supporting.join(", ")));
    }
    let absent = with(&profile.absent_features, FindingStatus::Absent);
    if !absent.is_empty() {
        parts.push(format!("no {}", absent.join(", ")));
    }
    let against: Vec<String> = with(&profile.symptoms, FindingStatus::Absent)
        .into_iter()
        .chain(with(&profile.absent_features, FindingStatus::Present))
        .collect();
    if !against.is_empty() {
        parts.push(format!("against: {}", against.join(", ")));
    }
    if parts.is_empty() {
        "retrieved as related context; no matching findings yet".to_string()
    } else {
        parts.join("; ")
    }
}

/// Rank candidate conditions. Ruled-out and uncited conditions never appear.
/// Order: score descending, then earliest confirmed match, then name.
pub fn rank_candidates(
    state: &DialogueState,
    hits: &[ScoredChunk],
    lexicon: &Lexicon,
    bands: &BandThresholds,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = build_profiles(hits, lexicon)
        .into_iter()
        .filter(|profile| {
            if state.is_ruled_out(&profile.condition) {
                tracing::debug!(condition = %profile.condition, "skipping ruled-out condition");
                return false;
            }
            if profile.citations.is_empty() {
                tracing::warn!(condition = %profile.condition, "suppressing uncited candidate");
                return false;
            }
            true
        })
        .map(|profile| {
            let score = score_profile(&profile, state).score();
            RankedCandidate {
                candidate: DiagnosisCandidate {
                    condition: profile.condition.clone(),
                    score,
                    band: bands.band_for(score),
                    citations: profile.citations.clone(),
                    red_flags: profile.red_flags.clone(),
                    next_steps: profile.next_steps.clone(),
                    rationale: Some(rationale(&profile, state)),
                },
                earliest_match: earliest_match(&profile, state),
                profile,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.candidate
            .score
            .partial_cmp(&a.candidate.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.earliest_match.cmp(&b.earliest_match))
            .then_with(|| a.candidate.condition.cmp(&b.candidate.condition))
    });
    ranked
}
