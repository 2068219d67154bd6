use crate::{
    classification::{ClassificationPolicy, LabelClass, NormalizedClass},
    config::{AssociationConfig, InsufficientRegionPolicy, MatchPolicy},
    detection::{retain_valid, Detection},
    error::CoreError,
    geometry::{overlap_ratio, BoundingBox},
    head_region::{crop, ensure_analyzable, head_region},
    heuristic::HelmetHeuristic,
};
use image::RgbImage;
use serde::Serialize;

/// Which path produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Overlap between the head region and a helmet-class detection.
    Geometric,
    /// Pixel heuristic on the head-region crop.
    Heuristic,
    /// Head region too small; status set by the insufficient-region policy.
    Insufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonVerdict {
    pub person_box: BoundingBox,
    pub person_confidence: f32,
    pub head_region: BoundingBox,
    pub has_helmet: bool,
    /// 0 when nothing supported a helmet.
    pub helmet_confidence: f32,
    /// Empty unless a helmet-class detection was matched.
    pub matched_helmet_label: String,
    pub status: NormalizedClass,
    pub source: VerdictSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictSummary {
    pub persons: usize,
    pub protected: usize,
    pub unprotected: usize,
    pub unknown: usize,
}

impl VerdictSummary {
    pub fn from_verdicts(verdicts: &[PersonVerdict]) -> Self {
        verdicts
            .iter()
            .fold(Self::default(), |mut summary, verdict| {
                summary.persons += 1;
                match verdict.status {
                    NormalizedClass::Protected => summary.protected += 1,
                    NormalizedClass::Unprotected => summary.unprotected += 1,
                    NormalizedClass::Unknown => summary.unknown += 1,
                }
                summary
            })
    }
}

enum MatchState<'a> {
    Unmatched,
    Matched { helmet: &'a Detection, ratio: f32 },
}

/// Pairs person detections with helmet detections of the same image.
///
/// Holds configuration only; every call works on its own inputs, so one
/// instance can serve concurrent images.
#[derive(Debug, Clone)]
pub struct Associator {
    config: AssociationConfig,
    policy: ClassificationPolicy,
    heuristic: HelmetHeuristic,
}

impl Default for Associator {
    fn default() -> Self {
        Self::new(AssociationConfig::default(), ClassificationPolicy::default())
    }
}

impl Associator {
    pub fn new(config: AssociationConfig, policy: ClassificationPolicy) -> Self {
        let heuristic = HelmetHeuristic::new(config.heuristic.clone(), config.min_region_pixels);
        Self {
            config,
            policy,
            heuristic,
        }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }

    /// One verdict per well-formed person, in input order.
    ///
    /// `helmets` are helmet-class detections (`hardhat`, `no-hardhat`, ...).
    /// When there are none and the fallback is enabled, each head region is
    /// judged from `image` pixels instead.
    pub fn associate(
        &self,
        persons: &[Detection],
        helmets: &[Detection],
        image: &RgbImage,
    ) -> Vec<PersonVerdict> {
        let persons = retain_valid(persons);
        let helmets: Vec<&Detection> = retain_valid(helmets)
            .into_iter()
            .filter(|helmet| self.is_head_state(helmet))
            .collect();
        let from_pixels = helmets.is_empty() && self.config.heuristic_fallback;

        persons
            .into_iter()
            .map(|person| {
                let region = head_region(&person.bbox, self.config.head_fraction);
                if from_pixels {
                    self.judge_pixels(person, region, image)
                } else {
                    self.judge_overlap(person, region, &helmets)
                }
            })
            .collect()
    }

    fn is_head_state(&self, helmet: &Detection) -> bool {
        match self.policy.classify(&helmet.label) {
            LabelClass::HeadState(_) => true,
            LabelClass::Person | LabelClass::Unrecognized => {
                tracing::warn!(
                    "Dropping helmet candidate `{}`: not a helmet-class label",
                    helmet.label
                );
                false
            }
        }
    }

    fn judge_overlap(
        &self,
        person: &Detection,
        region: BoundingBox,
        helmets: &[&Detection],
    ) -> PersonVerdict {
        if let Err(e) = ensure_analyzable(
            region.width(),
            region.height(),
            self.config.min_region_pixels,
        ) {
            return self.insufficient(person, region, e);
        }

        match self.find_match(&region, helmets) {
            MatchState::Matched { helmet, ratio } => {
                // Candidates are filtered to head states, so anything else
                // here means the label carries no helmet evidence.
                let status = match self.policy.classify(&helmet.label) {
                    LabelClass::HeadState(NormalizedClass::Protected) => NormalizedClass::Protected,
                    LabelClass::HeadState(NormalizedClass::Unprotected)
                    | LabelClass::HeadState(NormalizedClass::Unknown)
                    | LabelClass::Person
                    | LabelClass::Unrecognized => NormalizedClass::Unprotected,
                };
                tracing::debug!(
                    "Person at ({:.1}, {:.1}) matched `{}` with overlap {:.3}",
                    person.bbox.x1,
                    person.bbox.y1,
                    helmet.label,
                    ratio
                );
                PersonVerdict {
                    person_box: person.bbox,
                    person_confidence: person.confidence,
                    head_region: region,
                    has_helmet: status == NormalizedClass::Protected,
                    helmet_confidence: helmet.confidence,
                    matched_helmet_label: helmet.label.clone(),
                    status,
                    source: VerdictSource::Geometric,
                }
            }
            MatchState::Unmatched => PersonVerdict {
                person_box: person.bbox,
                person_confidence: person.confidence,
                head_region: region,
                has_helmet: false,
                helmet_confidence: 0.,
                matched_helmet_label: String::new(),
                status: NormalizedClass::Unprotected,
                source: VerdictSource::Geometric,
            },
        }
    }

    fn find_match<'a>(&self, region: &BoundingBox, helmets: &[&'a Detection]) -> MatchState<'a> {
        let mut state = MatchState::Unmatched;

        for &helmet in helmets {
            let ratio = overlap_ratio(&helmet.bbox, region);
            if ratio <= self.config.overlap_threshold {
                continue;
            }
            match self.config.match_policy {
                MatchPolicy::FirstMatch => return MatchState::Matched { helmet, ratio },
                MatchPolicy::BestOverlap => {
                    let improves = match state {
                        MatchState::Unmatched => true,
                        MatchState::Matched { ratio: best, .. } => ratio > best,
                    };
                    if improves {
                        state = MatchState::Matched { helmet, ratio };
                    }
                }
            }
        }

        state
    }

    fn judge_pixels(
        &self,
        person: &Detection,
        region: BoundingBox,
        image: &RgbImage,
    ) -> PersonVerdict {
        let pixels = crop(image, &region);
        match self.heuristic.analyze(&pixels) {
            Ok(outcome) => {
                let status = if outcome.helmet_present {
                    NormalizedClass::Protected
                } else {
                    NormalizedClass::Unprotected
                };
                PersonVerdict {
                    person_box: person.bbox,
                    person_confidence: person.confidence,
                    head_region: region,
                    has_helmet: outcome.helmet_present,
                    helmet_confidence: outcome.confidence,
                    matched_helmet_label: String::new(),
                    status,
                    source: VerdictSource::Heuristic,
                }
            }
            Err(e) => self.insufficient(person, region, e),
        }
    }

    fn insufficient(&self, person: &Detection, region: BoundingBox, e: CoreError) -> PersonVerdict {
        let status = match self.config.insufficient_region {
            InsufficientRegionPolicy::Unknown => NormalizedClass::Unknown,
            InsufficientRegionPolicy::Unprotected => NormalizedClass::Unprotected,
        };
        tracing::info!("{}; reporting person as {}", e, status.as_str());

        PersonVerdict {
            person_box: person.bbox,
            person_confidence: person.confidence,
            head_region: region,
            has_helmet: false,
            helmet_confidence: 0.,
            matched_helmet_label: String::new(),
            status,
            source: VerdictSource::Insufficient,
        }
    }
}

/// Associates with the default configuration and label vocabulary.
pub fn associate(
    persons: &[Detection],
    helmets: &[Detection],
    image: &RgbImage,
) -> Vec<PersonVerdict> {
    Associator::default().associate(persons, helmets, image)
}
