use crate::{
    config::Config,
    detector::{build_detector, Detector, DetectorError},
};
use futures::future::join_all;
use helmet_core::{
    Associator, ClassificationPolicy, Detection, PersonVerdict, VerdictSummary,
};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Everything known about one image after association.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub verdicts: Vec<PersonVerdict>,
    pub summary: VerdictSummary,
    /// Detectors that failed on this image and contributed nothing.
    pub degraded_detectors: Vec<String>,
}

impl ImageReport {
    pub fn new(verdicts: Vec<PersonVerdict>, degraded_detectors: Vec<String>) -> Self {
        Self {
            summary: VerdictSummary::from_verdicts(&verdicts),
            verdicts,
            degraded_detectors,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_detectors.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Association task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the detectors on a frame and associates their output.
pub struct HelmetPipeline {
    detectors: Vec<Arc<dyn Detector>>,
    policy: ClassificationPolicy,
    associator: Arc<Associator>,
    min_person_confidence: f32,
    min_helmet_confidence: f32,
}

impl HelmetPipeline {
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>,
        associator: Associator,
        policy: ClassificationPolicy,
    ) -> Self {
        Self {
            detectors,
            policy,
            associator: Arc::new(associator),
            min_person_confidence: 0.5,
            min_helmet_confidence: 0.4,
        }
    }

    pub fn with_min_confidences(mut self, person: f32, helmet: f32) -> Self {
        self.min_person_confidence = person;
        self.min_helmet_confidence = helmet;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, DetectorError> {
        let person = build_detector("person", &config.detectors.person)?.ok_or_else(|| {
            DetectorError::Config("the person detector cannot be disabled".into())
        })?;
        let mut detectors = vec![person];
        if let Some(helmet) = build_detector("helmet", &config.detectors.helmet)? {
            detectors.push(helmet);
        }

        let associator = Associator::new(
            config.association.clone(),
            config.classification.clone(),
        );

        Ok(Self::new(detectors, associator, config.classification.clone())
            .with_min_confidences(
                config.detectors.min_person_confidence,
                config.detectors.min_helmet_confidence,
            ))
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn analyze(&self, image: Arc<RgbImage>) -> Result<ImageReport, PipelineError> {
        let outcomes = join_all(self.detectors.iter().map(|d| d.detect(&image))).await;

        let mut raw = Vec::new();
        let mut degraded_detectors = Vec::new();
        for (detector, outcome) in self.detectors.iter().zip(outcomes) {
            match outcome {
                Ok(detections) => {
                    tracing::debug!(
                        "Detector `{}` returned {} detections",
                        detector.name(),
                        detections.len()
                    );
                    raw.extend(detections);
                }
                Err(e) => {
                    tracing::warn!(
                        "Detector `{}` failed, continuing without it: {}",
                        detector.name(),
                        e
                    );
                    degraded_detectors.push(detector.name().to_string());
                }
            }
        }

        let (persons, helmets) = self.policy.partition(&raw);
        let persons = above(persons, self.min_person_confidence);
        let helmets = above(helmets, self.min_helmet_confidence);

        let associator = self.associator.clone();
        let verdicts = tokio::task::spawn_blocking(move || {
            associator.associate(&persons, &helmets, &image)
        })
        .await?;

        let report = ImageReport::new(verdicts, degraded_detectors);
        tracing::info!(
            persons = report.summary.persons,
            protected = report.summary.protected,
            unprotected = report.summary.unprotected,
            unknown = report.summary.unknown,
            degraded = report.is_degraded(),
            "Image analysed"
        );

        Ok(report)
    }
}

fn above(detections: Vec<Detection>, min_confidence: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence >= min_confidence)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmet_core::{BoundingBox, NormalizedClass, VerdictSource};
    use image::Rgb;

    pub struct StaticDetector {
        pub name: &'static str,
        pub detections: Vec<Detection>,
    }

    #[async_trait]
    impl Detector for StaticDetector {
        fn name(&self) -> &str {
            self.name
        }

        async fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.detections.clone())
        }
    }

    pub struct FailingDetector(pub &'static str);

    #[async_trait]
    impl Detector for FailingDetector {
        fn name(&self) -> &str {
            self.0
        }

        async fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Err(DetectorError::MaxRetriesExceeded(self.0.to_string()))
        }
    }

    pub fn person_at(x1: f32) -> Detection {
        Detection::new("person", 0.9, BoundingBox::new(x1, 0., x1 + 100., 200.))
    }

    pub fn test_pipeline(detectors: Vec<Arc<dyn Detector>>) -> HelmetPipeline {
        HelmetPipeline::new(
            detectors,
            Associator::default(),
            ClassificationPolicy::default(),
        )
    }

    fn frame() -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(320, 240, Rgb([100, 100, 100])))
    }

    #[tokio::test]
    async fn test_detector_outputs_are_combined() {
        let pipeline = test_pipeline(vec![
            Arc::new(StaticDetector {
                name: "person",
                detections: vec![
                    person_at(0.),
                    Detection::new("car", 0.9, BoundingBox::new(0., 0., 50., 50.)),
                ],
            }),
            Arc::new(StaticDetector {
                name: "helmet",
                detections: vec![Detection::new(
                    "hardhat",
                    0.8,
                    BoundingBox::new(10., 0., 90., 40.),
                )],
            }),
        ]);

        let report = pipeline.analyze(frame()).await.unwrap();
        assert_eq!(report.summary.persons, 1);
        assert_eq!(report.summary.protected, 1);
        assert_eq!(report.verdicts[0].matched_helmet_label, "hardhat");
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn test_failed_helmet_detector_degrades_to_heuristic() {
        let pipeline = test_pipeline(vec![
            Arc::new(StaticDetector {
                name: "person",
                detections: vec![person_at(0.)],
            }),
            Arc::new(FailingDetector("helmet")),
        ]);

        let report = pipeline.analyze(frame()).await.unwrap();
        assert_eq!(report.degraded_detectors, vec!["helmet".to_string()]);
        assert_eq!(report.verdicts[0].source, VerdictSource::Heuristic);
        assert_eq!(report.verdicts[0].status, NormalizedClass::Unprotected);
    }

    #[tokio::test]
    async fn test_failed_person_detector_yields_empty_report() {
        let pipeline = test_pipeline(vec![Arc::new(FailingDetector("person"))]);

        let report = pipeline.analyze(frame()).await.unwrap();
        assert!(report.verdicts.is_empty());
        assert_eq!(report.summary.persons, 0);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_role_confidence_floors() {
        let pipeline = test_pipeline(vec![Arc::new(StaticDetector {
            name: "ppe",
            detections: vec![
                Detection::new("person", 0.45, BoundingBox::new(150., 0., 250., 200.)),
                person_at(0.),
                Detection::new("helmet", 0.35, BoundingBox::new(10., 0., 90., 40.)),
            ],
        })]);

        let report = pipeline.analyze(frame()).await.unwrap();
        assert_eq!(report.summary.persons, 1);
        // The weak helmet is gone, so the frame goes through the heuristic.
        assert_eq!(report.verdicts[0].source, VerdictSource::Heuristic);

        let lenient = test_pipeline(vec![Arc::new(StaticDetector {
            name: "ppe",
            detections: vec![
                person_at(0.),
                Detection::new("helmet", 0.35, BoundingBox::new(10., 0., 90., 40.)),
            ],
        })])
        .with_min_confidences(0.5, 0.3);
        let report = lenient.analyze(frame()).await.unwrap();
        assert_eq!(report.verdicts[0].source, VerdictSource::Geometric);
        assert!(report.verdicts[0].has_helmet);
    }
}
