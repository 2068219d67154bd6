use super::{Detector, DetectorError};
use crate::{config::RoboflowConfig, render::encode_jpeg};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use helmet_core::{BoundingBox, Detection};
use image::{imageops, RgbImage};
use reqwest::{header, Client};
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

/// One hosted-model prediction; `x` and `y` are the box center.
#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    class: String,
    confidence: f32,
}

/// Detector backed by the Roboflow hosted inference API.
pub struct RoboflowDetector {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    confidence: f32,
    inference_size: Option<u32>,
    jpeg_quality: u8,
    max_retries: u32,
}

impl RoboflowDetector {
    pub fn new(name: &str, config: &RoboflowConfig) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DetectorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            client,
            endpoint: config.get_endpoint(),
            api_key: config.api_key.clone(),
            confidence: config.confidence,
            inference_size: config.inference_size.filter(|size| *size > 0),
            jpeg_quality: config.jpeg_quality,
            max_retries: config.max_retries,
        })
    }

    /// JPEG payload to upload and the factors mapping its boxes back onto `image`.
    fn prepare(&self, image: &RgbImage) -> Result<(String, (f32, f32)), DetectorError> {
        let (width, height) = image.dimensions();
        let (jpeg, scale) = match self.inference_size {
            Some(size) => {
                let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
                let scale = (width as f32 / size as f32, height as f32 / size as f32);
                (encode_jpeg(&resized, self.jpeg_quality)?, scale)
            }
            None => (encode_jpeg(image, self.jpeg_quality)?, (1., 1.)),
        };
        Ok((STANDARD.encode(jpeg), scale))
    }

    async fn post_with_retries(&self, payload: String) -> Result<String, DetectorError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        // The hosted API takes the threshold as a percentage.
        let confidence = ((self.confidence * 100.).round() as u32).to_string();

        for attempt in 0..=self.max_retries {
            let result = self
                .client
                .post(&self.endpoint)
                .query(&[("api_key", self.api_key.as_str()), ("confidence", confidence.as_str())])
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(payload.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(|source| DetectorError::Request {
                        detector: self.name.clone(),
                        source,
                    });
                }
                Ok(response) if response.status().is_server_error() => {
                    tracing::warn!(
                        "Detector `{}` answered {} (attempt {}/{})",
                        self.name,
                        response.status(),
                        attempt + 1,
                        self.max_retries + 1
                    );
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(DetectorError::Status {
                        detector: self.name.clone(),
                        status,
                        body,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        "Request to detector `{}` failed (attempt {}/{}): {}",
                        self.name,
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                }
            }

            if attempt < self.max_retries {
                let jitter = rand::random::<f32>() * 0.2 + 0.9;
                sleep(retry_delay.mul_f32(jitter)).await;
                retry_delay = (retry_delay * 2).min(max_retry_delay);
            }
        }

        Err(DetectorError::MaxRetriesExceeded(self.name.clone()))
    }
}

/// Parses an inference response, converting center boxes to corner boxes
/// and scaling them by `(scale_x, scale_y)`.
fn parse_predictions(body: &str, (scale_x, scale_y): (f32, f32)) -> Result<Vec<Detection>, DetectorError> {
    let response: InferenceResponse = serde_json::from_str(body)
        .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;

    Ok(response
        .predictions
        .into_iter()
        .map(|p| {
            let bbox = BoundingBox::from_center(p.x, p.y, p.width, p.height).scale(scale_x, scale_y);
            Detection::new(p.class, p.confidence, bbox)
        })
        .collect())
}

#[async_trait]
impl Detector for RoboflowDetector {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(detector = %self.name))]
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (payload, scale) = self.prepare(image)?;
        let body = self.post_with_retries(payload).await?;
        parse_predictions(&body, scale)
    }
}
