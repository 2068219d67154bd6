use crate::{error::CoreError, geometry::BoundingBox};
use serde::{Deserialize, Serialize};

/// One labelled box produced by an external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.bbox.is_well_formed() {
            return Err(CoreError::InputMalformed {
                label: self.label.clone(),
                reason: format!(
                    "box ({}, {}, {}, {}) violates corner ordering",
                    self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::InputMalformed {
                label: self.label.clone(),
                reason: format!("confidence {} outside [0, 1]", self.confidence),
            });
        }
        Ok(())
    }
}

/// Keeps the well-formed detections, logging and dropping the rest.
pub fn retain_valid(detections: &[Detection]) -> Vec<&Detection> {
    detections
        .iter()
        .filter(|detection| match detection.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping detection: {}", e);
                false
            }
        })
        .collect()
}
