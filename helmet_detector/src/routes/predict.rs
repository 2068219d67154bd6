use crate::{
    pipeline::{ImageReport, PipelineError},
    render::{decode_image, render_jpeg, RenderError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use image::RgbImage;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Request body is not a readable image: {0}")]
    Decode(RenderError),
    #[error("Analysis failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Rendering failed: {0}")]
    Render(RenderError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictError::Decode(_) => StatusCode::BAD_REQUEST,
            PredictError::Pipeline(_) | PredictError::Render(_) | PredictError::HttpBuilder(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, format!("Something went wrong: {}", self)).into_response()
    }
}

async fn analyze(
    state: &SharedState,
    image_data: &Bytes,
    route: &str,
) -> Result<(Arc<RgbImage>, ImageReport), PredictError> {
    state.metrics.record_request(route);
    let image = Arc::new(decode_image(image_data).map_err(PredictError::Decode)?);

    let started = Instant::now();
    let report = state.pipeline.analyze(image.clone()).await?;
    state
        .metrics
        .record_analysis_duration(started.elapsed().as_millis() as u64, route);
    state.metrics.record_report(&report);

    Ok((image, report))
}

/// Image bytes in, `ImageReport` JSON out.
#[instrument(skip(state, image_data), fields(bytes = image_data.len()))]
pub async fn predict(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Json<ImageReport>, PredictError> {
    let (_, report) = analyze(&state, &image_data, "predict").await?;
    Ok(Json(report))
}

/// Image bytes in, annotated JPEG out.
#[instrument(skip(state, image_data), fields(bytes = image_data.len()))]
pub async fn predict_image(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Response, PredictError> {
    let (image, report) = analyze(&state, &image_data, "predict_image").await?;
    let annotated = render_jpeg(&image, &report, state.jpeg_quality).map_err(PredictError::Render)?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(axum::body::Body::from(annotated))
        .map_err(|e| PredictError::HttpBuilder(e.to_string()))?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use crate::{
        pipeline::tests::{person_at, StaticDetector},
        render::{decode_image, encode_jpeg},
        routes::test_support::router,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use helmet_core::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        router(vec![
            Arc::new(StaticDetector {
                name: "person",
                detections: vec![person_at(0.), person_at(150.)],
            }),
            Arc::new(StaticDetector {
                name: "helmet",
                detections: vec![Detection::new(
                    "Hardhat",
                    0.9,
                    BoundingBox::new(10., 0., 90., 40.),
                )],
            }),
        ])
    }

    fn jpeg_body() -> Body {
        let image = RgbImage::from_pixel(320, 240, Rgb([50, 50, 50]));
        Body::from(encode_jpeg(&image, 90).unwrap())
    }

    #[tokio::test]
    async fn test_predict_returns_report() {
        let response = app()
            .oneshot(Request::post("/predict").body(jpeg_body()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["summary"]["persons"], 2);
        assert_eq!(json["summary"]["protected"], 1);
        assert_eq!(json["summary"]["unprotected"], 1);
        assert_eq!(json["verdicts"][0]["status"], "protected");
        assert_eq!(json["verdicts"][0]["matched_helmet_label"], "Hardhat");
        assert_eq!(json["verdicts"][1]["source"], "geometric");
    }

    #[tokio::test]
    async fn test_predict_image_returns_jpeg() {
        let response = app()
            .oneshot(Request::post("/predict_image").body(jpeg_body()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(decode_image(&body).unwrap().dimensions(), (320, 240));
    }

    #[tokio::test]
    async fn test_unreadable_body_is_bad_request() {
        let response = app()
            .oneshot(
                Request::post("/predict")
                    .body(Body::from("definitely not an image"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
