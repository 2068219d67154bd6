use async_trait::async_trait;
use helmet_core::{
    Associator, BoundingBox, ClassificationPolicy, Detection, NormalizedClass, VerdictSource,
};
use helmet_detector::{
    config::{load_from, Environment},
    detector::{Detector, DetectorError},
    run_scan, HelmetPipeline,
};
use image::{Rgb, RgbImage};
use std::{path::Path, sync::Arc};

struct Scripted(Vec<Detection>);

#[async_trait]
impl Detector for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn hosted_style_labels_flow_through_the_pipeline() {
    let detector = Scripted(vec![
        Detection::new("person", 0.92, BoundingBox::new(0., 0., 100., 200.)),
        Detection::new("person", 0.88, BoundingBox::new(200., 0., 300., 200.)),
        Detection::new("Hardhat", 0.81, BoundingBox::new(10., 0., 90., 40.)),
        Detection::new("NO-Hardhat", 0.77, BoundingBox::new(205., 0., 295., 45.)),
    ]);
    let pipeline = HelmetPipeline::new(
        vec![Arc::new(detector)],
        Associator::default(),
        ClassificationPolicy::default(),
    );
    let image = Arc::new(RgbImage::from_pixel(320, 240, Rgb([128, 128, 128])));

    let report = pipeline.analyze(image).await.unwrap();

    let statuses: Vec<_> = report.verdicts.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![NormalizedClass::Protected, NormalizedClass::Unprotected]
    );
    assert!(report
        .verdicts
        .iter()
        .all(|v| v.source == VerdictSource::Geometric));
    assert_eq!(report.verdicts[1].matched_helmet_label, "NO-Hardhat");
}

#[tokio::test]
async fn scanning_an_empty_directory_touches_no_detector() {
    let configuration = Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration");
    let config = load_from(&configuration, Environment::Local).unwrap();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let summary = run_scan(&config, input.path(), Some(&output.path().join("results")))
        .await
        .unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 0);
    assert!(output.path().join("results").is_dir());
}
