use crate::heuristic::HeuristicConfig;
use serde::{Deserialize, Serialize};

/// How a person is paired when several helmet boxes clear the overlap threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Take the first candidate in detector order.
    #[default]
    FirstMatch,
    /// Take the candidate covering the most of the head region; ties keep detector order.
    BestOverlap,
}

impl TryFrom<String> for MatchPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "first_match" => Ok(Self::FirstMatch),
            "best_overlap" => Ok(Self::BestOverlap),
            other => Err(format!(
                "{} is not a supported match policy. Use either `first_match` or `best_overlap`.",
                other
            )),
        }
    }
}

/// Verdict given to a person whose head region is too small to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum InsufficientRegionPolicy {
    #[default]
    Unknown,
    Unprotected,
}

impl TryFrom<String> for InsufficientRegionPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "unprotected" => Ok(Self::Unprotected),
            other => Err(format!(
                "{} is not a supported insufficient region policy. Use either `unknown` or `unprotected`.",
                other
            )),
        }
    }
}

/// Tunables of the association step. The defaults are empirical starting
/// points, not derived optima.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// A helmet matches when it covers more than this share of the head region.
    pub overlap_threshold: f32,
    /// Share of the person height, from the top, treated as the head.
    pub head_fraction: f32,
    /// Head regions narrower or shorter than this are not judged.
    pub min_region_pixels: u32,
    pub match_policy: MatchPolicy,
    pub insufficient_region: InsufficientRegionPolicy,
    /// Run the pixel heuristic when an image has no helmet-class detections at all.
    pub heuristic_fallback: bool,
    pub heuristic: HeuristicConfig,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.3,
            head_fraction: 0.25,
            min_region_pixels: 20,
            match_policy: MatchPolicy::default(),
            insufficient_region: InsufficientRegionPolicy::default(),
            heuristic_fallback: true,
            heuristic: HeuristicConfig::default(),
        }
    }
}
