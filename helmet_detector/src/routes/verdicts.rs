use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Latest live report, or 404 until the live loop has produced one.
pub async fn latest_verdicts(State(state): State<SharedState>) -> Response {
    state.metrics.record_request("verdicts");
    match state.cache.latest() {
        Some(cached) => Json(cached.as_ref().clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "No live verdicts yet").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        pipeline::ImageReport,
        routes::test_support::state,
        server::build_router,
    };
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_verdicts_before_and_after_first_report() {
        let state = state(Vec::new(), None);
        let cache = state.cache.clone();
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(Request::get("/verdicts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        cache.replace(ImageReport::new(Vec::new(), vec!["helmet".into()]));
        let response = router
            .oneshot(Request::get("/verdicts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["sequence"], 1);
        assert_eq!(json["summary"]["persons"], 0);
        assert_eq!(json["degraded_detectors"][0], "helmet");
    }
}
