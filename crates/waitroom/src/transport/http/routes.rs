//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::get,
};

use crate::controller::AdmissionController;
use crate::gauges::GaugeSnapshot;
use crate::ticket::AccessView;

async fn request_access(
    State(controller): State<Arc<AdmissionController>>,
    Path(user_id): Path<String>,
) -> Json<AccessView> {
    let response = controller.request_access(&user_id).await;
    Json(response.view(controller.now()))
}

async fn revoke_access(
    State(controller): State<Arc<AdmissionController>>,
    Path(user_id): Path<String>,
) -> Json<bool> {
    Json(controller.revoke_access(&user_id).await)
}

async fn status(State(controller): State<Arc<AdmissionController>>) -> Json<GaugeSnapshot> {
    Json(controller.snapshot().await)
}

pub fn routes(controller: Arc<AdmissionController>) -> Router {
    Router::new()
        .route("/access/{id}", get(request_access).delete(revoke_access))
        .route("/status", get(status))
        .with_state(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AdmissionConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn controller(capacity: usize) -> Arc<AdmissionController> {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let config = AdmissionConfig::default()
            .with_capacity_limit(capacity)
            .with_expiration(Duration::from_secs(60));
        Arc::new(
            AdmissionController::new(config)
                .unwrap()
                .with_clock(Arc::new(clock)),
        )
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, response_json(response).await)
    }

    #[tokio::test]
    async fn access_admits_then_queues() {
        let app = routes(controller(1));

        let (status, json) = get_json(&app, "/access/alice").await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(json, @r#"
        {
          "expires_on": "2023-11-14T22:14:20Z",
          "has_access": true,
          "requests_ahead": 0
        }
        "#);

        let (_, json) = get_json(&app, "/access/bob").await;
        assert_eq!(json["has_access"], false);
        assert_eq!(json["requests_ahead"], 0);
        assert!(json["expires_on"].is_null());
    }

    #[tokio::test]
    async fn delete_revokes_and_frees_slot() {
        let app = routes(controller(1));
        get_json(&app, "/access/alice").await;
        get_json(&app, "/access/bob").await;

        let response = app
            .clone()
            .oneshot(
                Request::delete("/access/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!(true));

        let (_, json) = get_json(&app, "/access/bob").await;
        assert_eq!(json["has_access"], true);
    }

    #[tokio::test]
    async fn delete_unknown_user_is_false() {
        let app = routes(controller(1));

        let response = app
            .oneshot(Request::delete("/access/nobody").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response_json(response).await, serde_json::json!(false));
    }

    #[tokio::test]
    async fn status_reports_gauges() {
        let app = routes(controller(1));
        get_json(&app, "/access/alice").await;
        get_json(&app, "/access/bob").await;

        let (status, json) = get_json(&app, "/status").await;

        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(json, @r#"
        {
          "active_tickets": 1,
          "capacity_limit": 1,
          "occupancy": "QUEUEING",
          "queue_len": 1,
          "unexpired_tickets": 1
        }
        "#);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = routes(controller(1));

        let response = app
            .oneshot(Request::get("/access").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
