//! Symptom vocabulary: canonical keys, synonyms, red-flag danger signs and
//! body-temperature readings.

use std::sync::OnceLock;

use regex::Regex;

/// Fever threshold, in °F.
pub const FEVER_F: f32 = 100.4;
/// Readings at or above this (°F) raise the very-high-fever danger sign.
pub const VERY_HIGH_FEVER_F: f32 = 104.0;

pub const FEVER: &str = "fever";
pub const VERY_HIGH_FEVER: &str = "very high fever";

#[derive(Debug, Clone, Copy)]
pub struct SymptomDef {
    pub key: &'static str,
    pub synonyms: &'static [&'static str],
    pub question: &'static str,
    /// Present when the symptom is a danger sign.
    pub red_flag: Option<&'static str>,
}

const SYMPTOMS: &[SymptomDef] = &[
    SymptomDef {
        key: "sore throat",
        synonyms: &["sore throat", "throat pain", "throat is sore", "painful throat", "scratchy throat", "throat hurts"],
        question: "Do you have a sore throat?",
        red_flag: None,
    },
    SymptomDef {
        key: FEVER,
        synonyms: &["fever", "feverish", "febrile", "pyrexia", "high temperature", "running a temperature"],
        question: "Have you had a fever? If you measured it, what was the temperature?",
        red_flag: None,
    },
    SymptomDef {
        key: VERY_HIGH_FEVER,
        synonyms: &["very high fever", "extremely high fever", "hyperpyrexia"],
        question: "Has your temperature reached 104°F (40°C) or higher?",
        red_flag: Some("A temperature of 104°F (40°C) or higher needs prompt medical attention."),
    },
    SymptomDef {
        key: "cough",
        synonyms: &["cough", "coughing", "coughs"],
        question: "Do you have a cough?",
        red_flag: None,
    },
    SymptomDef {
        key: "runny nose",
        synonyms: &["runny nose", "running nose", "rhinorrhea", "nasal discharge"],
        question: "Do you have a runny nose?",
        red_flag: None,
    },
    SymptomDef {
        key: "nasal congestion",
        synonyms: &["nasal congestion", "stuffy nose", "blocked nose", "congested", "congestion"],
        question: "Is your nose stuffy or blocked?",
        red_flag: None,
    },
    SymptomDef {
        key: "sneezing",
        synonyms: &["sneezing", "sneeze", "sneezes"],
        question: "Have you been sneezing?",
        red_flag: None,
    },
    SymptomDef {
        key: "body aches",
        synonyms: &["body aches", "body ache", "muscle aches", "muscle pain", "myalgia", "aching all over"],
        question: "Do you have body or muscle aches?",
        red_flag: None,
    },
    SymptomDef {
        key: "fatigue",
        synonyms: &["fatigue", "fatigued", "tired", "tiredness", "exhausted", "exhaustion"],
        question: "Are you feeling unusually tired or fatigued?",
        red_flag: None,
    },
    SymptomDef {
        key: "headache",
        synonyms: &["headache", "headaches", "head ache"],
        question: "Do you have a headache?",
        red_flag: None,
    },
    SymptomDef {
        key: "chills",
        synonyms: &["chills", "shivering", "rigors"],
        question: "Have you had chills or shivering?",
        red_flag: None,
    },
    SymptomDef {
        key: "swollen lymph nodes",
        synonyms: &["swollen lymph nodes", "swollen lymph node", "swollen glands", "swollen neck glands", "tender lymph nodes", "enlarged lymph nodes", "lymphadenopathy"],
        question: "Are the glands (lymph nodes) in your neck swollen or tender?",
        red_flag: None,
    },
    SymptomDef {
        key: "tonsillar exudate",
        synonyms: &["tonsillar exudate", "white patches", "white spots on tonsils", "pus on tonsils", "exudate"],
        question: "Are there white patches or pus on your tonsils?",
        red_flag: None,
    },
    SymptomDef {
        key: "loss of taste or smell",
        synonyms: &["loss of taste or smell", "loss of taste", "loss of smell", "lost my sense of smell", "lost my sense of taste", "anosmia"],
        question: "Have you lost your sense of taste or smell?",
        red_flag: None,
    },
    SymptomDef {
        key: "itchy eyes",
        synonyms: &["itchy eyes", "watery eyes", "itchy watery eyes"],
        question: "Are your eyes itchy or watery?",
        red_flag: None,
    },
    SymptomDef {
        key: "shortness of breath",
        synonyms: &["shortness of breath", "short of breath", "difficulty breathing", "trouble breathing", "breathless", "can't breathe"],
        question: "Are you short of breath or having difficulty breathing?",
        red_flag: Some("Difficulty breathing needs urgent in-person assessment."),
    },
    SymptomDef {
        key: "difficulty swallowing",
        synonyms: &["difficulty swallowing", "trouble swallowing", "can't swallow", "unable to swallow", "dysphagia"],
        question: "Are you having difficulty swallowing?",
        red_flag: Some("Difficulty swallowing can signal a deep throat infection; seek prompt care."),
    },
    SymptomDef {
        key: "drooling",
        synonyms: &["drooling", "can't swallow saliva"],
        question: "Are you drooling or unable to swallow your saliva?",
        red_flag: Some("Drooling with a sore throat can signal airway obstruction; seek emergency care."),
    },
    SymptomDef {
        key: "muffled voice",
        synonyms: &["muffled voice", "hot potato voice"],
        question: "Has your voice become muffled?",
        red_flag: Some("A muffled voice can indicate a peritonsillar abscess; seek prompt care."),
    },
    SymptomDef {
        key: "stridor",
        synonyms: &["stridor", "noisy breathing", "high-pitched breathing"],
        question: "Is there a high-pitched noise when you breathe in?",
        red_flag: Some("Noisy, high-pitched breathing is an airway emergency; call emergency services."),
    },
    SymptomDef {
        key: "stiff neck",
        synonyms: &["stiff neck", "neck stiffness"],
        question: "Do you have a stiff neck?",
        red_flag: Some("Fever with a stiff neck needs urgent evaluation."),
    },
    SymptomDef {
        key: "chest pain",
        synonyms: &["chest pain", "pain in my chest"],
        question: "Do you have any chest pain?",
        red_flag: Some("Chest pain needs urgent in-person assessment."),
    },
    SymptomDef {
        key: "confusion",
        synonyms: &["confusion", "confused", "disoriented"],
        question: "Has there been any new confusion?",
        red_flag: Some("New confusion needs emergency assessment."),
    },
    SymptomDef {
        key: "cyanosis",
        synonyms: &["cyanosis", "blue lips", "bluish lips", "lips turning blue", "bluish skin"],
        question: "Are your lips or skin turning bluish?",
        red_flag: Some("Bluish lips or skin indicate low oxygen; call emergency services."),
    },
];

/// Asked in order when nothing has been retrieved yet.
const SCREENING_ORDER: &[&str] = &[
    "sore throat",
    FEVER,
    "cough",
    "runny nose",
    "body aches",
    "swollen lymph nodes",
    "fatigue",
    "headache",
    "loss of taste or smell",
    "shortness of breath",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub fahrenheit: f32,
}

impl TemperatureReading {
    pub fn is_fever(&self) -> bool {
        self.fahrenheit >= FEVER_F
    }

    pub fn is_very_high(&self) -> bool {
        self.fahrenheit >= VERY_HIGH_FEVER_F
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Lexicon;

impl Lexicon {
    pub fn symptoms(&self) -> &'static [SymptomDef] {
        SYMPTOMS
    }

    pub fn get(&self, key: &str) -> Option<&'static SymptomDef> {
        SYMPTOMS.iter().find(|def| def.key == key)
    }

    /// Canonical key for a term, matching keys and synonyms case-insensitively.
    pub fn canonical(&self, term: &str) -> Option<&'static str> {
        let term = term.trim().to_lowercase();
        SYMPTOMS
            .iter()
            .find(|def| def.key == term || def.synonyms.iter().any(|s| *s == term))
            .map(|def| def.key)
    }

    /// Canonical key when known, otherwise the lowercased term.
    pub fn canonical_or_raw(&self, term: &str) -> String {
        self.canonical(term)
            .map(str::to_string)
            .unwrap_or_else(|| term.trim().to_lowercase())
    }

    pub fn is_red_flag(&self, key: &str) -> bool {
        self.red_flag_message(key).is_some()
    }

    pub fn red_flag_message(&self, key: &str) -> Option<&'static str> {
        self.get(key).and_then(|def| def.red_flag)
    }

    pub fn question_for(&self, key: &str) -> String {
        match self.get(key) {
            Some(def) => def.question.to_string(),
            None => format!("Do you have {key}?"),
        }
    }

    pub fn screening_order(&self) -> &'static [&'static str] {
        SCREENING_ORDER
    }

    /// Symptom keys mentioned in `clause`, with the byte offset of each first
    /// mention, ordered by position.
    pub fn find_mentions(&self, clause: &str) -> Vec<(usize, &'static str)> {
        let lower = clause.to_lowercase();
        let mut found: Vec<(usize, &'static str)> = Vec::new();
        for def in SYMPTOMS {
            let first = def
                .synonyms
                .iter()
                .filter_map(|syn| find_word(&lower, syn))
                .min();
            if let Some(pos) = first {
                found.push((pos, def.key));
            }
        }
        found.sort();
        found
    }

    /// First body-temperature reading in `clause`, normalised to °F.
    ///
    /// A unit (`F`/`C`, optionally with `°` or "degrees") is required unless
    /// the clause talks about fever or temperature.
    pub fn temperature(&self, clause: &str) -> Option<TemperatureReading> {
        let re = temperature_regex()?;
        let lower = clause.to_lowercase();
        let mentions_temp = lower.contains("fever") || lower.contains("temp");

        for caps in re.captures_iter(&lower) {
            let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok()) else {
                continue;
            };
            let unit = caps.get(2).map(|m| m.as_str());
            let fahrenheit = match unit {
                Some(u) if u.starts_with('f') => value,
                Some(u) if u.starts_with('c') => value * 9.0 / 5.0 + 32.0,
                _ if mentions_temp && (90.0..=110.0).contains(&value) => value,
                _ if mentions_temp && (34.0..=43.0).contains(&value) => value * 9.0 / 5.0 + 32.0,
                _ => continue,
            };
            if (90.0..=110.0).contains(&fahrenheit) {
                return Some(TemperatureReading { fahrenheit });
            }
        }
        None
    }
}

fn temperature_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2,3}(?:\.\d+)?)\s*(?:°|º|degrees?)?\s*(fahrenheit|celsius|f|c)?\b").ok()
    })
    .as_ref()
}

/// Byte offset of `needle` in `haystack` at word boundaries.
fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(offset) = haystack[start..].find(needle) {
        let pos = start + offset;
        let end = pos + needle.len();
        let before_ok = haystack[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(pos);
        }
        start = pos + needle.len().max(1);
        if start >= haystack.len() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_merges_case_and_synonyms() {
        let lexicon = Lexicon;
        assert_eq!(lexicon.canonical("Swollen Glands"), Some("swollen lymph nodes"));
        assert_eq!(lexicon.canonical("  throat pain "), Some("sore throat"));
        assert_eq!(lexicon.canonical("Fever"), Some(FEVER));
        assert_eq!(lexicon.canonical("hiccups"), None);
        assert_eq!(lexicon.canonical_or_raw("Hiccups"), "hiccups");
    }

    #[test]
    fn find_mentions_respects_word_boundaries() {
        let lexicon = Lexicon;
        assert!(lexicon.find_mentions("I feel untired").is_empty());
        let mentions = lexicon.find_mentions("Throat pain and a dry cough");
        let keys: Vec<_> = mentions.iter().map(|(_, k)| *k).collect();
        assert_eq!(keys, vec!["sore throat", "cough"]);
    }

    #[test]
    fn very_high_fever_also_mentions_fever() {
        let lexicon = Lexicon;
        let keys: Vec<_> = lexicon
            .find_mentions("a very high fever")
            .into_iter()
            .map(|(_, k)| k)
            .collect();
        assert!(keys.contains(&FEVER));
        assert!(keys.contains(&VERY_HIGH_FEVER));
    }

    #[test]
    fn temperature_readings_normalise_units() {
        let lexicon = Lexicon;
        let f = lexicon.temperature("fever 101.5°F").unwrap();
        assert!((f.fahrenheit - 101.5).abs() < 1e-4);
        assert!(f.is_fever());
        assert!(!f.is_very_high());

        let c = lexicon.temperature("temp was 40 C").unwrap();
        assert!((c.fahrenheit - 104.0).abs() < 1e-3);
        assert!(c.is_very_high());

        let low = lexicon.temperature("temperature 99 degrees").unwrap();
        assert!(!low.is_fever());
    }

    #[test]
    fn bare_numbers_are_not_temperatures() {
        let lexicon = Lexicon;
        assert!(lexicon.temperature("I am 38 years old").is_none());
        assert!(lexicon.temperature("for 3 days").is_none());
    }

    #[test]
    fn red_flags_have_messages() {
        let lexicon = Lexicon;
        for key in [
            "shortness of breath",
            "difficulty swallowing",
            "drooling",
            "stridor",
            "muffled voice",
            "stiff neck",
            "chest pain",
            "confusion",
            "cyanosis",
            VERY_HIGH_FEVER,
        ] {
            assert!(lexicon.is_red_flag(key), "{key} should be a red flag");
        }
        assert!(!lexicon.is_red_flag("cough"));
    }

    #[test]
    fn screening_order_uses_known_keys() {
        let lexicon = Lexicon;
        for key in lexicon.screening_order() {
            assert!(lexicon.get(key).is_some(), "{key} missing from lexicon");
        }
    }
}
