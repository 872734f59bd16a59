//! Symptom catalog and auxiliary clinical signals

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub id: String,
    pub description: String,
    /// Severity tier: low 0.05, medium 0.10, high 0.15
    pub weight: f64,
}

/// Severity weights per symptom identifier.
///
/// Immutable once built; share it behind an `Arc` across requests.
#[derive(Debug, Clone)]
pub struct SymptomCatalog {
    entries: Vec<Symptom>,
    index: HashMap<String, usize>,
    total_weight: f64,
}

const LOW: f64 = 0.05;
const MEDIUM: f64 = 0.10;
const HIGH: f64 = 0.15;

impl SymptomCatalog {
    pub fn new(entries: Vec<Symptom>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(PipelineError::invalid(format!(
                    "symptom '{}' has invalid weight {}",
                    entry.id, entry.weight
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(PipelineError::invalid(format!("duplicate symptom '{}'", entry.id)));
            }
        }

        Ok(Self::from_entries(entries))
    }

    /// Paediatric pneumonia symptom table
    pub fn builtin() -> Self {
        let table = [
            ("frequent-cough", "Coughing a lot, sometimes wet or with an unusual sound", MEDIUM),
            ("breathing-difficulty", "Breathing fast, hard, or wheezing", HIGH),
            ("fever", "Feeling very hot, shivery, or sweating", MEDIUM),
            ("chest-pain", "Chest or tummy hurts, especially when breathing or coughing", HIGH),
            ("fatigue", "Very tired or sleepy, wants to rest more than usual", LOW),
            ("cyanosis", "Blue lips or fingers", HIGH),
            ("poor-appetite", "Not wanting to eat or drink", LOW),
            ("confusion", "Dizzy or confused, not acting normally", HIGH),
            ("nasal-congestion", "Runny or stuffy nose", LOW),
            ("chills", "Shivering or shaking, even under blankets", MEDIUM),
            ("excessive-crying", "Crying more than usual, especially when breathing hurts", MEDIUM),
            ("reduced-play", "Playing less or losing interest in toys", LOW),
        ];

        let entries = table
            .iter()
            .map(|(id, description, weight)| Symptom {
                id: id.to_string(),
                description: description.to_string(),
                weight: *weight,
            })
            .collect();
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<Symptom>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let total_weight = entries.iter().map(|e| e.weight).sum();

        Self {
            entries,
            index,
            total_weight,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Symptom> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symptom> {
        self.entries.iter()
    }

    /// Theoretical maximum: every symptom matched
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Normalized score in [0, 1] for a set of matched identifiers.
    ///
    /// Unknown identifiers contribute nothing; repeated identifiers count once.
    pub fn score<I, S>(&self, matched: I) -> f64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.total_weight <= 0.0 {
            return 0.0;
        }

        let unique: HashSet<String> = matched
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        // Catalog order keeps the float sum independent of set iteration order
        let sum: f64 = self
            .entries
            .iter()
            .filter(|e| unique.contains(&e.id))
            .map(|e| e.weight)
            .sum();

        (sum / self.total_weight).clamp(0.0, 1.0)
    }
}

impl Default for SymptomCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Reported prior-pneumonia history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryInput {
    Flag(bool),
    Count(u32),
}

impl Default for HistoryInput {
    fn default() -> Self {
        HistoryInput::Flag(false)
    }
}

impl FromStr for HistoryInput {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "y" => Ok(HistoryInput::Flag(true)),
            "no" | "false" | "n" | "" => Ok(HistoryInput::Flag(false)),
            other => other
                .parse::<u32>()
                .map(HistoryInput::Count)
                .map_err(|_| PipelineError::invalid(format!("unrecognised history value '{}'", s))),
        }
    }
}

/// Bounded contribution of prior history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPolicy {
    /// Added per reported episode
    pub per_event: f64,
    /// Upper bound, also the value for a plain "yes"
    pub max_boost: f64,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            per_event: 0.05,
            max_boost: 0.2,
        }
    }
}

impl HistoryPolicy {
    pub fn score(&self, history: HistoryInput) -> f64 {
        match history {
            HistoryInput::Flag(true) => self.max_boost,
            HistoryInput::Flag(false) => 0.0,
            HistoryInput::Count(count) => (count as f64 * self.per_event).min(self.max_boost),
        }
    }
}

/// History score with the standard 0.05-per-episode step
pub fn history_score(history: HistoryInput, max_boost: f64) -> f64 {
    HistoryPolicy {
        max_boost,
        ..HistoryPolicy::default()
    }
    .score(history)
}
