//! Emotion score mappings and the report shape sent to clients and stored
//! with each conversation detail.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category → probability.
pub type EmotionScores = BTreeMap<String, f32>;

/// Tie-break order for [`dominant_emotion`]. Categories not listed rank after
/// these, alphabetically.
const CANONICAL_ORDER: [&str; 9] = [
    "neutral", "happy", "sad", "angry", "fear", "disgust", "surprise", "positive", "negative",
];

/// Three-way collapse of a fine-grained category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardEmotion {
    Positive,
    Negative,
    Neutral,
}

impl StandardEmotion {
    pub fn of(category: &str) -> Self {
        match category {
            "happy" | "surprise" | "positive" => StandardEmotion::Positive,
            "sad" | "angry" | "fear" | "disgust" | "negative" => StandardEmotion::Negative,
            _ => StandardEmotion::Neutral,
        }
    }

    /// Display color for UI rendering.
    pub fn color(self) -> &'static str {
        match self {
            StandardEmotion::Positive => "#FFD700",
            StandardEmotion::Negative => "#4682B4",
            StandardEmotion::Neutral => "#F5F5F5",
        }
    }
}

fn canonical_rank(category: &str) -> usize {
    CANONICAL_ORDER
        .iter()
        .position(|c| *c == category)
        .unwrap_or(CANONICAL_ORDER.len())
}

/// Highest-scoring category.
///
/// Ties go to the category earliest in the canonical order, then
/// alphabetically. An empty mapping is `neutral`.
pub fn dominant_emotion(scores: &EmotionScores) -> String {
    let mut best: Option<(&str, f32)> = None;
    for (category, &score) in scores {
        let replace = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score
                        && (canonical_rank(category), category.as_str())
                            < (canonical_rank(current), current))
            }
        };
        if replace {
            best = Some((category.as_str(), score));
        }
    }
    best.map(|(category, _)| category.to_string())
        .unwrap_or_else(|| "neutral".to_string())
}

/// Scores for one modality plus their derived labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReport {
    pub scores: EmotionScores,
    pub dominant: String,
    pub standard: StandardEmotion,
    pub color: String,
}

impl EmotionReport {
    pub fn from_scores(scores: EmotionScores) -> Self {
        let dominant = dominant_emotion(&scores);
        let standard = StandardEmotion::of(&dominant);
        Self {
            scores,
            dominant,
            standard,
            color: standard.color().to_string(),
        }
    }
}

/// Text-based and audio-based emotion for one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    pub text: EmotionReport,
    pub audio: EmotionReport,
}

impl EmotionAnalysis {
    pub fn from_scores(text: EmotionScores, audio: EmotionScores) -> Self {
        Self {
            text: EmotionReport::from_scores(text),
            audio: EmotionReport::from_scores(audio),
        }
    }

    /// Flat distribution used whenever the emotion provider fails.
    pub fn neutral() -> Self {
        Self::from_scores(
            scores(&[("positive", 0.33), ("negative", 0.33), ("neutral", 0.34)]),
            scores(&[("neutral", 1.0)]),
        )
    }

    /// The label stored as a detail row's dominant emotion.
    pub fn dominant(&self) -> &str {
        &self.audio.dominant
    }
}

/// Build a score mapping from literal pairs.
pub fn scores(pairs: &[(&str, f32)]) -> EmotionScores {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}
