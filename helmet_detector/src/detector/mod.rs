//! Object detectors feeding the association step.
//!
//! A detector is an opaque oracle: it turns a frame into labelled boxes and
//! may fail. Failures are reported to the pipeline, which treats them as "no
//! detections from this detector" for the frame.

#[cfg(feature = "onnx")]
mod onnx;
mod roboflow;

#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;
pub use roboflow::RoboflowDetector;

use crate::config::{DetectorKind, DetectorSettings};
use async_trait::async_trait;
use helmet_core::Detection;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Request to detector `{detector}` failed: {source}")]
    Request {
        detector: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Detector `{detector}` answered with status {status}: {body}")]
    Status {
        detector: String,
        status: u16,
        body: String,
    },
    #[error("Maximum retries exceeded for detector `{0}`")]
    MaxRetriesExceeded(String),
    #[error("Invalid detector response: {0}")]
    InvalidResponse(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Invalid detector configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Name used in logs, metrics and degraded-detector reports.
    fn name(&self) -> &str;

    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Builds the detector configured for `role`, or `None` when it is disabled.
pub fn build_detector(
    role: &str,
    settings: &DetectorSettings,
) -> Result<Option<Arc<dyn Detector>>, DetectorError> {
    tracing::debug!("Building `{}` detector of kind `{}`", role, settings.kind.as_str());
    match settings.kind {
        DetectorKind::Disabled => {
            tracing::info!("Detector `{}` is disabled", role);
            Ok(None)
        }
        DetectorKind::Roboflow => {
            let config = settings.roboflow.as_ref().ok_or_else(|| {
                DetectorError::Config(format!(
                    "detectors.{role}.kind is roboflow but detectors.{role}.roboflow is missing"
                ))
            })?;
            let detector = RoboflowDetector::new(role, config)?;
            tracing::info!("Detector `{}` uses hosted model {}", role, config.model_id);
            Ok(Some(Arc::new(detector)))
        }
        DetectorKind::Onnx => build_onnx(role, settings),
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(
    role: &str,
    settings: &DetectorSettings,
) -> Result<Option<Arc<dyn Detector>>, DetectorError> {
    let config = settings.onnx.as_ref().ok_or_else(|| {
        DetectorError::Config(format!(
            "detectors.{role}.kind is onnx but detectors.{role}.onnx is missing"
        ))
    })?;
    config.validate().map_err(DetectorError::Config)?;
    Ok(Some(Arc::new(OnnxDetector::new(role, config)?)))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(
    role: &str,
    _settings: &DetectorSettings,
) -> Result<Option<Arc<dyn Detector>>, DetectorError> {
    Err(DetectorError::Config(format!(
        "detector `{role}` needs a build with the `onnx` feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoboflowConfig;

    #[test]
    fn test_disabled_detector_builds_nothing() {
        let detector = build_detector("helmet", &DetectorSettings::disabled()).unwrap();
        assert!(detector.is_none());
    }

    #[test]
    fn test_missing_section_is_a_config_error() {
        let settings = DetectorSettings {
            kind: DetectorKind::Roboflow,
            roboflow: None,
            onnx: None,
        };
        assert!(matches!(
            build_detector("person", &settings),
            Err(DetectorError::Config(_))
        ));
    }

    #[test]
    fn test_roboflow_detector_takes_role_name() {
        let settings = DetectorSettings {
            kind: DetectorKind::Roboflow,
            roboflow: Some(RoboflowConfig {
                api_url: "http://127.0.0.1:9".into(),
                model_id: "hardhat/1".into(),
                api_key: String::new(),
                confidence: 0.4,
                inference_size: None,
                jpeg_quality: 80,
                timeout_ms: 100,
                max_retries: 0,
            }),
            onnx: None,
        };
        let detector = build_detector("helmet", &settings).unwrap().unwrap();
        assert_eq!(detector.name(), "helmet");
    }
}
