use crate::detection::Detection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedClass {
    Protected,
    Unprotected,
    Unknown,
}

impl NormalizedClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedClass::Protected => "protected",
            NormalizedClass::Unprotected => "unprotected",
            NormalizedClass::Unknown => "unknown",
        }
    }
}

/// Outcome of running a raw detector label through the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelClass {
    /// The label itself states whether headgear is worn.
    HeadState(NormalizedClass),
    /// A person or head box that still needs to be associated with a helmet.
    Person,
    Unrecognized,
}

impl LabelClass {
    pub fn normalized(&self) -> NormalizedClass {
        match self {
            LabelClass::HeadState(class) => *class,
            LabelClass::Person | LabelClass::Unrecognized => NormalizedClass::Unknown,
        }
    }
}

/// Ordered label rules shared by every detector vocabulary:
///
/// | order | rule | result |
/// |---|---|---|
/// | 1 | negation term together with a helmet term | `Unprotected` |
/// | 2 | helmet term | `Protected` |
/// | 3 | person term | `Person` |
/// | 4 | anything else | `Unrecognized` |
///
/// Negation goes first since negative labels ("no-helmet") contain the
/// positive term. Matching ignores case and separators, so `NO-Hardhat`,
/// `no_hardhat` and `nohardhat` are the same label. A negation term counts
/// when it is a whole word of the label or glued in front of a helmet term.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClassificationPolicy {
    pub helmet_terms: Vec<String>,
    pub negation_terms: Vec<String>,
    pub person_terms: Vec<String>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            helmet_terms: vec!["hardhat".into(), "helmet".into()],
            negation_terms: vec!["no".into(), "without".into()],
            person_terms: vec!["person".into(), "head".into()],
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn compact(text: &str) -> String {
    words(text).concat()
}

impl ClassificationPolicy {
    pub fn classify(&self, label: &str) -> LabelClass {
        let label_words = words(label);
        let label_compact = label_words.concat();

        let helmet_terms: Vec<String> = self.helmet_terms.iter().map(|t| compact(t)).collect();
        let mentions_helmet = helmet_terms
            .iter()
            .any(|term| !term.is_empty() && label_compact.contains(term.as_str()));

        if mentions_helmet {
            let negated = self.negation_terms.iter().map(|n| compact(n)).any(|negation| {
                label_words.contains(&negation)
                    || helmet_terms
                        .iter()
                        .any(|term| label_compact.contains(&format!("{negation}{term}")))
            });

            return if negated {
                LabelClass::HeadState(NormalizedClass::Unprotected)
            } else {
                LabelClass::HeadState(NormalizedClass::Protected)
            };
        }

        let is_person = self
            .person_terms
            .iter()
            .map(|t| compact(t))
            .any(|term| !term.is_empty() && label_compact.contains(term.as_str()));
        if is_person {
            return LabelClass::Person;
        }

        LabelClass::Unrecognized
    }

    /// Splits raw detector output into person-class and head-state
    /// detections, keeping the detector's order. Unrecognized labels are dropped.
    pub fn partition(&self, detections: &[Detection]) -> (Vec<Detection>, Vec<Detection>) {
        let mut persons = Vec::new();
        let mut head_states = Vec::new();

        for detection in detections {
            match self.classify(&detection.label) {
                LabelClass::Person => persons.push(detection.clone()),
                LabelClass::HeadState(_) => head_states.push(detection.clone()),
                LabelClass::Unrecognized => {
                    tracing::debug!("Ignoring detection with label `{}`", detection.label);
                }
            }
        }

        (persons, head_states)
    }
}
