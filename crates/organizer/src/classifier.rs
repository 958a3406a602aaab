use std::fmt;

use novel_shelf_core::strip_markers;
use serde::Serialize;

use crate::config::{ClassificationConfig, Thresholds};

/// How many runners-up are checked for a close score.
const COMPETITORS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: u32,
}

impl fmt::Display for CategoryScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.category, self.score)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewReason {
    NoKeywordMatch,
    ScoreTooLow { score: u32 },
    TooClose {
        leader: CategoryScore,
        competitors: Vec<CategoryScore>,
    },
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeywordMatch => f.write_str("no keyword match"),
            Self::ScoreTooLow { score } => write!(f, "score too low ({score})"),
            Self::TooClose {
                leader,
                competitors,
            } => {
                let listed: Vec<String> = competitors.iter().map(ToString::to_string).collect();
                write!(f, "close scores: {leader} vs {}", listed.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Classified { category: String, score: u32 },
    NeedsReview(ReviewReason),
}

impl Decision {
    pub fn is_review(&self) -> bool {
        matches!(self, Self::NeedsReview(_))
    }

    /// Human-readable annotation: the review reason or the winning score.
    pub fn info(&self) -> String {
        match self {
            Self::Classified { score, .. } => format!("match score: {score}"),
            Self::NeedsReview(reason) => reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub decision: Decision,
    /// Scores in category order.
    pub scores: Vec<CategoryScore>,
}

pub trait Classifier {
    fn classify(&self, filename: &str, sample: &str) -> Classification;
}

struct Profile {
    id: String,
    tiers: [(Vec<String>, u32); 3],
}

/// Deterministic weighted keyword counting over a text sample.
pub struct KeywordClassifier {
    profiles: Vec<Profile>,
    thresholds: Thresholds,
}

impl KeywordClassifier {
    pub fn new(config: &ClassificationConfig) -> Self {
        let weights = config.weights;
        let lowered = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };

        let profiles = config
            .categories
            .iter()
            .map(|c| Profile {
                id: c.id.clone(),
                tiers: [
                    (lowered(&c.keywords.high_weight), weights.high),
                    (lowered(&c.keywords.medium_weight), weights.medium),
                    (lowered(&c.keywords.low_weight), weights.low),
                ],
            })
            .collect();

        Self {
            profiles,
            thresholds: config.thresholds,
        }
    }

    /// Score every category against an already prepared text.
    pub fn score(&self, text: &str) -> Vec<CategoryScore> {
        self.profiles
            .iter()
            .map(|profile| CategoryScore {
                category: profile.id.clone(),
                score: profile
                    .tiers
                    .iter()
                    .flat_map(|(words, weight)| {
                        words.iter().map(move |w| {
                            u32::try_from(text.matches(w.as_str()).count())
                                .unwrap_or(u32::MAX)
                                .saturating_mul(*weight)
                        })
                    })
                    .fold(0, u32::saturating_add),
            })
            .collect()
    }

    pub fn decide(&self, scores: &[CategoryScore]) -> Decision {
        let mut ranked: Vec<&CategoryScore> = scores.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));

        let Some(&leader) = ranked.first().filter(|top| top.score > 0) else {
            return Decision::NeedsReview(ReviewReason::NoKeywordMatch);
        };
        if leader.score < self.thresholds.direct_classification {
            return Decision::NeedsReview(ReviewReason::ScoreTooLow {
                score: leader.score,
            });
        }

        let competitors: Vec<CategoryScore> = ranked
            .iter()
            .skip(1)
            .take(COMPETITORS)
            .filter(|c| c.score > 0 && leader.score - c.score < self.thresholds.score_difference)
            .map(|c| (*c).clone())
            .collect();

        if competitors.is_empty() {
            Decision::Classified {
                category: leader.category.clone(),
                score: leader.score,
            }
        } else {
            Decision::NeedsReview(ReviewReason::TooClose {
                leader: leader.clone(),
                competitors,
            })
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, filename: &str, sample: &str) -> Classification {
        let scores = self.score(&prepare_text(filename, sample));
        Classification {
            decision: self.decide(&scores),
            scores,
        }
    }
}

/// Join the filename and sample, lowercase, drop sampler markers, and collapse whitespace.
pub fn prepare_text(filename: &str, sample: &str) -> String {
    let joined = format!("{filename} {sample}").to_lowercase();
    strip_markers(&joined).split_whitespace().collect::<Vec<_>>().join(" ")
}
