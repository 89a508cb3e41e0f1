//! Dialogue state tracking: findings, ruled-out conditions and a bounded
//! conversation history, updated as a pure function of prior state and turn.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hippocrates_schema::{ConversationTurn, Speaker};
use serde::Serialize;

use crate::config::DialogueConfig;
use crate::lexicon::{Lexicon, FEVER, VERY_HIGH_FEVER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Present,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub status: FindingStatus,
    /// Patient turn on which the symptom was first mentioned.
    pub established_at: usize,
    pub updated_at: usize,
    /// Number of times the patient contradicted an earlier statement.
    pub revisions: u32,
}

impl Finding {
    pub fn is_revised(&self) -> bool {
        self.revisions > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueState {
    findings: BTreeMap<String, Finding>,
    ruled_out: Vec<String>,
    history: VecDeque<ConversationTurn>,
    history_limit: usize,
    turn_cap: usize,
    patient_turns: usize,
    asked: BTreeSet<String>,
    pending_question: Option<String>,
}

impl DialogueState {
    pub fn new(config: DialogueConfig) -> Self {
        Self {
            findings: BTreeMap::new(),
            ruled_out: Vec::new(),
            history: VecDeque::new(),
            history_limit: config.history_limit.max(1),
            turn_cap: config.turn_cap,
            patient_turns: 0,
            asked: BTreeSet::new(),
            pending_question: None,
        }
    }

    pub fn findings(&self) -> &BTreeMap<String, Finding> {
        &self.findings
    }

    pub fn finding(&self, key: &str) -> Option<&Finding> {
        self.findings.get(key)
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.findings.contains_key(key)
    }

    fn keys_with(&self, status: FindingStatus) -> Vec<&str> {
        let mut keys: Vec<(&usize, &str)> = self
            .findings
            .iter()
            .filter(|(_, f)| f.status == status)
            .map(|(k, f)| (&f.established_at, k.as_str()))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    /// Confirmed symptoms in the order they were established.
    pub fn present_symptoms(&self) -> Vec<&str> {
        self.keys_with(FindingStatus::Present)
    }

    pub fn absent_symptoms(&self) -> Vec<&str> {
        self.keys_with(FindingStatus::Absent)
    }

    pub fn ruled_out(&self) -> &[String] {
        &self.ruled_out
    }

    pub fn is_ruled_out(&self, condition: &str) -> bool {
        self.ruled_out
            .iter()
            .any(|c| c.eq_ignore_ascii_case(condition.trim()))
    }

    pub fn history(&self) -> &VecDeque<ConversationTurn> {
        &self.history
    }

    /// The last `history_limit` turns, oldest first.
    pub fn trimmed_history(&self) -> Vec<ConversationTurn> {
        self.history.iter().cloned().collect()
    }

    pub fn recent_history(&self, limit: usize) -> Vec<&ConversationTurn> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).collect()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn patient_turns(&self) -> usize {
        self.patient_turns
    }

    pub fn turn_cap(&self) -> usize {
        self.turn_cap
    }

    pub fn turn_cap_reached(&self) -> bool {
        self.patient_turns >= self.turn_cap
    }

    pub fn asked(&self) -> &BTreeSet<String> {
        &self.asked
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    pub fn last_patient_utterance(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::Patient)
            .map(|t| t.text.as_str())
    }

    /// Plain-text digest used in generation prompts.
    pub fn summary(&self) -> String {
        let describe = |keys: Vec<&str>| -> String {
            if keys.is_empty() {
                return "none".to_string();
            }
            keys.iter()
                .map(|k| match self.findings.get(*k) {
                    Some(f) if f.is_revised() => format!("{k} (revised)"),
                    _ => k.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        let ruled_out = if self.ruled_out.is_empty() {
            "none".to_string()
        } else {
            self.ruled_out.join(", ")
        };
        format!(
            "Reported symptoms: {}\nDenied symptoms: {}\nRuled out: {}\nPatient turns: {} of {}",
            describe(self.present_symptoms()),
            describe(self.absent_symptoms()),
            ruled_out,
            self.patient_turns,
            self.turn_cap
        )
    }

    fn push_history(&mut self, turn: ConversationTurn) {
        self.history.push_back(turn);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn observe(&mut self, key: &str, status: FindingStatus) {
        let turn = self.patient_turns;
        match self.findings.get_mut(key) {
            None => {
                self.findings.insert(
                    key.to_string(),
                    Finding {
                        status,
                        established_at: turn,
                        updated_at: turn,
                        revisions: 0,
                    },
                );
            }
            Some(finding) if finding.status != status => {
                tracing::warn!(
                    event = "ContradictoryEvidence",
                    symptom = key,
                    previous = ?finding.status,
                    current = ?status,
                    turn,
                    "patient contradicted an earlier statement; keeping the latest"
                );
                finding.status = status;
                finding.updated_at = turn;
                finding.revisions += 1;
            }
            Some(_) => {}
        }
    }

    fn rule_out(&mut self, condition: &str) {
        if !self.is_ruled_out(condition) {
            tracing::info!(condition, "condition ruled out");
            self.ruled_out.push(condition.to_string());
        }
    }
}

/// Facts pulled from one patient utterance, in utterance order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub observations: Vec<(String, FindingStatus)>,
    pub ruled_out: Vec<String>,
}

#[derive(Debug, Clone)]
struct ConditionAliases {
    name: String,
    aliases: Vec<String>,
}

const NEGATION_CUES: &[&str] = &[
    "no", "not", "denies", "denied", "deny", "without", "never", "none", "negative for",
    "absence of", "free of", "don't", "dont", "doesn't", "haven't", "hasn't", "isn't", "aren't",
    "didn't", "no longer",
];

/// Completed exclusions only. "rule out X" names a test still to be done.
const RULE_OUT_CUES: &[&str] = &[
    "ruled out", "negative for", "tested negative", "test negative", "test was negative",
    "test came back negative", "excluded",
];

const GENERIC_WORDS: &[&str] = &["common", "viral", "acute", "allergic", "infectious", "bacterial"];

const CLAUSE_JOINERS: &[&str] = &[" and ", " but ", " although ", " though ", " however ", " also "];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Answer {
    Yes,
    No,
    Unsure,
}

#[derive(Debug, Clone, Default)]
pub struct DialogueTracker {
    lexicon: Lexicon,
    conditions: Vec<ConditionAliases>,
}

impl DialogueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that recognises the given condition names in rule-out phrases.
    pub fn with_conditions<I, S>(conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tracker = Self::new();
        tracker.add_conditions(conditions);
        tracker
    }

    pub fn add_conditions<I, S>(&mut self, conditions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = self.conditions.iter().map(|c| c.name.clone()).collect();
        for name in conditions {
            let name = name.as_ref().trim();
            if !name.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.to_string());
            }
        }
        self.conditions = build_aliases(&names);
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Next state after `turn`. `prior` is left untouched.
    pub fn update(&self, prior: &DialogueState, turn: ConversationTurn) -> DialogueState {
        let mut next = prior.clone();
        if turn.speaker == Speaker::Patient {
            next.patient_turns += 1;
            let extraction = self.extract(&turn.text, prior.pending_question());
            for (key, status) in &extraction.observations {
                next.observe(key, *status);
            }
            for condition in &extraction.ruled_out {
                next.rule_out(condition);
            }
            next.pending_question = None;
        }
        next.push_history(turn);
        next
    }

    /// Record the assistant's reply and, for a follow-up, the symptom asked about.
    pub fn record_reply(
        &self,
        prior: &DialogueState,
        turn: ConversationTurn,
        asked_symptom: Option<&str>,
    ) -> DialogueState {
        let mut next = self.update(prior, turn);
        next.pending_question = asked_symptom.map(str::to_string);
        if let Some(symptom) = asked_symptom {
            next.asked.insert(symptom.to_string());
        }
        next
    }

    pub fn extract(&self, text: &str, pending: Option<&str>) -> Extraction {
        let mut extraction = Extraction::default();
        let mut pending = pending;

        for clause in split_clauses(text) {
            let mentions = self.lexicon.find_mentions(&clause);
            let reading = self.lexicon.temperature(&clause);

            if let Some(symptom) = pending {
                if mentions.iter().any(|(_, k)| *k == symptom) {
                    pending = None;
                } else if mentions.is_empty() && reading.is_none() {
                    match classify_answer(&clause) {
                        Some(Answer::Yes) => {
                            extraction
                                .observations
                                .push((symptom.to_string(), FindingStatus::Present));
                            pending = None;
                        }
                        Some(Answer::No) => {
                            extraction
                                .observations
                                .push((symptom.to_string(), FindingStatus::Absent));
                            pending = None;
                        }
                        Some(Answer::Unsure) => pending = None,
                        None => {}
                    }
                }
            }

            let rule_out = RULE_OUT_CUES.iter().any(|cue| find_phrase(&clause, cue).is_some());
            if rule_out {
                for condition in &self.conditions {
                    if condition
                        .aliases
                        .iter()
                        .any(|alias| find_phrase(&clause, alias).is_some())
                        && !extraction.ruled_out.contains(&condition.name)
                    {
                        extraction.ruled_out.push(condition.name.clone());
                    }
                }
            }

            let first_cue = NEGATION_CUES
                .iter()
                .filter_map(|cue| find_phrase(&clause, cue))
                .min();
            for (pos, key) in mentions {
                if reading.is_some() && key == FEVER {
                    continue;
                }
                let status = match first_cue {
                    Some(cue) if cue < pos => FindingStatus::Absent,
                    _ => FindingStatus::Present,
                };
                extraction.observations.push((key.to_string(), status));
            }

            if let Some(reading) = reading {
                let status = if reading.is_fever() {
                    FindingStatus::Present
                } else {
                    FindingStatus::Absent
                };
                extraction.observations.push((FEVER.to_string(), status));
                if reading.is_very_high() {
                    extraction
                        .observations
                        .push((VERY_HIGH_FEVER.to_string(), FindingStatus::Present));
                }
            }
        }

        extraction
    }
}

fn build_aliases(names: &[String]) -> Vec<ConditionAliases> {
    let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    let word_count = |word: &str| {
        lowered
            .iter()
            .filter(|n| find_phrase(n, word).is_some())
            .count()
    };

    names
        .iter()
        .zip(&lowered)
        .map(|(name, lower)| {
            let mut aliases = vec![lower.clone()];
            let mut push = |alias: &str| {
                let alias = alias.trim().to_string();
                if !alias.is_empty() && !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            };
            if let (Some(open), Some(close)) = (lower.find('('), lower.rfind(')')) {
                if open < close {
                    push(&lower[..open]);
                    push(&lower[open + 1..close]);
                }
            }
            for word in lower.split(|c: char| c.is_whitespace() || c == '(' || c == ')') {
                if word.chars().count() >= 4
                    && !GENERIC_WORDS.contains(&word)
                    && word_count(word) == 1
                {
                    push(word);
                }
            }
            ConditionAliases {
                name: name.clone(),
                aliases,
            }
        })
        .collect()
}

/// Split an utterance into clauses. Decimal points are kept.
fn split_clauses(text: &str) -> Vec<String> {
    let normalized = text.replace(['\u{2019}', '\u{2018}'], "'").to_lowercase();
    let chars: Vec<char> = normalized.chars().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let decimal_point = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if matches!(c, ',' | ';' | '.' | '!' | '?' | '\n') && !decimal_point {
            pieces.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    pieces.push(current);

    let mut clauses = Vec::new();
    for piece in pieces {
        let mut parts = vec![format!(" {} ", piece.trim())];
        for joiner in CLAUSE_JOINERS {
            parts = parts
                .into_iter()
                .flat_map(|p| {
                    p.split(joiner)
                        .map(|s| format!(" {} ", s.trim()))
                        .collect::<Vec<_>>()
                })
                .collect();
        }
        clauses.extend(
            parts
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        );
    }
    clauses
}

fn find_phrase(haystack: &str, phrase: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(offset) = haystack[start..].find(phrase) {
        let pos = start + offset;
        let end = pos + phrase.len();
        let before_ok = haystack[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric() && c != '\'');
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '\'');
        if before_ok && after_ok {
            return Some(pos);
        }
        start = end.max(pos + 1);
        if start >= haystack.len() {
            break;
        }
        while !haystack.is_char_boundary(start) {
            start += 1;
        }
    }
    None
}

fn classify_answer(clause: &str) -> Option<Answer> {
    let cleaned: String = clause
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    const UNSURE: &[&str] = &[
        "not sure", "unsure", "don't know", "dont know", "no idea", "maybe", "i'm not sure",
        "im not sure", "can't tell",
    ];
    if UNSURE.iter().any(|p| find_phrase(&cleaned, p).is_some()) {
        return Some(Answer::Unsure);
    }

    const YES: &[&str] = &[
        "yes", "yeah", "yep", "yup", "y", "correct", "definitely", "affirmative", "i do", "it does",
        "sure",
    ];
    const NO: &[&str] = &[
        "no", "nope", "nah", "n", "never", "none", "negative", "not really", "i don't", "i do not",
        "i haven't", "it doesn't",
    ];
    let starts_with = |phrases: &[&str]| {
        phrases.iter().any(|p| {
            cleaned == *p
                || cleaned
                    .strip_prefix(p)
                    .is_some_and(|rest| rest.starts_with(' '))
        })
    };
    if starts_with(NO) {
        Some(Answer::No)
    } else if starts_with(YES) {
        Some(Answer::Yes)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(history_limit: usize, turn_cap: usize) -> DialogueConfig {
        DialogueConfig {
            history_limit,
            turn_cap,
        }
    }

    fn tracker() -> DialogueTracker {
        DialogueTracker::with_conditions([
            "Strep Pharyngitis",
            "Viral Pharyngitis",
            "Influenza (Flu)",
            "Common Cold",
            "COVID-19",
        ])
    }

    fn say(tracker: &DialogueTracker, state: &DialogueState, text: &str) -> DialogueState {
        tracker.update(state, ConversationTurn::patient(text))
    }

    #[test]
    fn update_is_pure() {
        let tracker = tracker();
        let prior = DialogueState::new(config(10, 8));
        let snapshot = prior.clone();
        let next = say(&tracker, &prior, "I have a sore throat");
        assert_eq!(prior, snapshot);
        assert_eq!(next.present_symptoms(), vec!["sore throat"]);
        assert_eq!(next.patient_turns(), 1);
    }

    #[test]
    fn scenario_utterance_is_extracted() {
        let tracker = tracker();
        let state = say(
            &tracker,
            &DialogueState::new(config(10, 8)),
            "Sore throat, fever 101.5°F, no cough, swollen lymph nodes",
        );
        assert_eq!(
            state.present_symptoms(),
            vec!["fever", "sore throat", "swollen lymph nodes"]
        );
        assert_eq!(state.absent_symptoms(), vec!["cough"]);
        assert!(state.finding(VERY_HIGH_FEVER).is_none());
    }

    #[test]
    fn synonyms_and_case_are_deduplicated() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 8));
        state = say(&tracker, &state, "My THROAT HURTS");
        state = say(&tracker, &state, "still a sore throat and swollen glands");
        assert_eq!(
            state.present_symptoms(),
            vec!["sore throat", "swollen lymph nodes"]
        );
        assert_eq!(state.findings().len(), 2);
        assert_eq!(state.finding("sore throat").map(|f| f.revisions), Some(0));
    }

    #[test]
    fn negation_applies_within_clause_only() {
        let tracker = tracker();
        let state = say(
            &tracker,
            &DialogueState::new(config(10, 8)),
            "I have a fever but no cough or runny nose",
        );
        assert_eq!(state.present_symptoms(), vec!["fever"]);
        let mut absent = state.absent_symptoms();
        absent.sort();
        assert_eq!(absent, vec!["cough", "runny nose"]);
    }

    #[test]
    fn low_reading_denies_fever_and_high_reading_flags() {
        let tracker = tracker();
        let low = say(&tracker, &DialogueState::new(config(10, 8)), "temperature 99.1 F");
        assert_eq!(low.absent_symptoms(), vec!["fever"]);

        let high = say(&tracker, &DialogueState::new(config(10, 8)), "my temp is 40.2C");
        assert_eq!(high.present_symptoms(), vec!["fever", "very high fever"]);
    }

    #[test]
    fn contradiction_last_statement_wins() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 8));
        state = say(&tracker, &state, "I have a cough");
        state = say(&tracker, &state, "actually no cough");
        let finding = state.finding("cough").unwrap();
        assert_eq!(finding.status, FindingStatus::Absent);
        assert_eq!(finding.revisions, 1);
        assert_eq!(finding.established_at, 1);
        assert_eq!(finding.updated_at, 2);
        assert!(state.history().iter().any(|t| t.text == "I have a cough"));
    }

    #[test]
    fn yes_no_answers_resolve_pending_question() {
        let tracker = tracker();
        let state = DialogueState::new(config(10, 8));
        let asked = tracker.record_reply(
            &state,
            ConversationTurn::assistant("Do you have a cough?"),
            Some("cough"),
        );
        assert_eq!(asked.pending_question(), Some("cough"));
        assert!(asked.asked().contains("cough"));

        let denied = say(&tracker, &asked, "No.");
        assert_eq!(denied.absent_symptoms(), vec!["cough"]);
        assert_eq!(denied.pending_question(), None);

        let confirmed = say(&tracker, &asked, "yes, and a headache too");
        let mut present = confirmed.present_symptoms();
        present.sort();
        assert_eq!(present, vec!["cough", "headache"]);

        let unsure = say(&tracker, &asked, "Not sure");
        assert!(unsure.findings().is_empty());
        assert_eq!(unsure.pending_question(), None);
    }

    #[test]
    fn no_with_new_symptom_answers_and_adds() {
        let tracker = tracker();
        let asked = tracker.record_reply(
            &DialogueState::new(config(10, 8)),
            ConversationTurn::assistant("Any fever?"),
            Some("fever"),
        );
        let state = say(&tracker, &asked, "No, but I'm very tired");
        assert_eq!(state.absent_symptoms(), vec!["fever"]);
        assert_eq!(state.present_symptoms(), vec!["fatigue"]);
    }

    #[test]
    fn rule_out_is_monotonic() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 8));
        state = say(&tracker, &state, "the rapid strep test came back negative, strep ruled out");
        assert_eq!(state.ruled_out(), ["Strep Pharyngitis".to_string()]);

        state = say(&tracker, &state, "negative for flu");
        assert!(state.is_ruled_out("influenza (flu)"));

        for text in ["I think it might be strep after all", "sore throat is worse", "yes"] {
            state = say(&tracker, &state, text);
        }
        assert!(state.is_ruled_out("Strep Pharyngitis"));
        assert_eq!(state.ruled_out().len(), 2);
    }

    #[test]
    fn planned_rule_out_keeps_condition() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 8));
        state = say(&tracker, &state, "my doctor wants to rule out strep, I have a sore throat");
        state = say(&tracker, &state, "they will run a swab that rules out flu");
        assert!(state.ruled_out().is_empty());
        assert_eq!(state.present_symptoms(), vec!["sore throat"]);

        state = say(&tracker, &state, "strep was excluded by the culture");
        assert_eq!(state.ruled_out(), ["Strep Pharyngitis".to_string()]);
    }

    #[test]
    fn large_history_limit_allocates_on_demand() {
        let tracker = tracker();
        let state = say(&tracker, &DialogueState::new(config(usize::MAX, 8)), "sore throat");
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history_limit(), usize::MAX);
    }

    #[test]
    fn ambiguous_words_are_not_aliases() {
        let tracker = tracker();
        let state = say(
            &tracker,
            &DialogueState::new(config(10, 8)),
            "pharyngitis ruled out",
        );
        assert!(state.ruled_out().is_empty());
    }

    #[test]
    fn history_never_exceeds_limit() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(4, 100));
        for i in 0..25 {
            state = if i % 2 == 0 {
                say(&tracker, &state, &format!("message {i}"))
            } else {
                tracker.record_reply(&state, ConversationTurn::assistant("ok"), None)
            };
            assert!(state.history().len() <= 4);
            assert!(state.trimmed_history().len() <= 4);
        }
        assert_eq!(state.trimmed_history().len(), 4);
        assert_eq!(state.last_patient_utterance(), Some("message 24"));
    }

    #[test]
    fn turn_cap_counts_patient_turns_only() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 2));
        state = say(&tracker, &state, "sore throat");
        state = tracker.record_reply(&state, ConversationTurn::assistant("Any fever?"), Some("fever"));
        assert!(!state.turn_cap_reached());
        state = say(&tracker, &state, "yes");
        assert!(state.turn_cap_reached());
    }

    #[test]
    fn split_clauses_keeps_decimals() {
        let clauses = split_clauses("Fever 101.5F. No cough; swollen glands and sore throat");
        assert_eq!(
            clauses,
            vec!["fever 101.5f", "no cough", "swollen glands", "sore throat"]
        );
    }

    #[test]
    fn summary_mentions_revisions() {
        let tracker = tracker();
        let mut state = DialogueState::new(config(10, 8));
        state = say(&tracker, &state, "cough");
        state = say(&tracker, &state, "no cough");
        let summary = state.summary();
        assert!(summary.contains("Denied symptoms: cough (revised)"));
        assert!(summary.contains("Patient turns: 2 of 8"));
    }
}
