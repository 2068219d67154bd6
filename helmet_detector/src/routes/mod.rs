mod health;
mod metrics;
mod predict;
mod verdicts;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use health::healthcheck;
use metrics::metrics_handler;
use predict::{predict, predict_image};
use verdicts::latest_verdicts;
use video_feed::video_feed;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/predict", post(predict))
        .route("/predict_image", post(predict_image))
        .route("/verdicts", get(latest_verdicts))
        .route("/video_feed", get(video_feed))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        cache::VerdictCache,
        detector::Detector,
        pipeline::tests::test_pipeline,
        server::{build_router, SharedState},
        stream::VideoStream,
        telemetry::Metrics,
    };
    use axum::Router;
    use std::sync::Arc;

    pub fn state(detectors: Vec<Arc<dyn Detector>>, video_stream: Option<VideoStream>) -> SharedState {
        SharedState {
            pipeline: Arc::new(test_pipeline(detectors)),
            cache: Arc::new(VerdictCache::new()),
            video_stream,
            metrics: Arc::new(Metrics::new().unwrap()),
            jpeg_quality: 80,
        }
    }

    pub fn router(detectors: Vec<Arc<dyn Detector>>) -> Router {
        build_router(state(detectors, None))
    }
}
