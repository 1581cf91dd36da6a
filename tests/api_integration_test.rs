//! REST API integration tests for the provenance server.
//!
//! The full router (CORS, tracing, state) is driven with `oneshot` over an
//! in-memory server database.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use provenance_capture::domain::{GeoErrorCode, GeoLocation, ProvenanceLog, Stage};
use provenance_capture::fraud::{FraudThresholds, MOCK_LOCATION_REASON};
use provenance_capture::server::{build_router, AppState};

use common::*;

// ============================================================================
// Test Helpers
// ============================================================================

async fn app() -> Router {
    build_router().with_state(AppState::new(server_pool().await, FraudThresholds::default()))
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn fraud_request(id: &str, (lat, lng): (f64, f64), timestamp: &str, is_manual: bool) -> Request<Body> {
    json_request(
        Method::POST,
        "/functions/v1/fraud-detection",
        json!({
            "record": {
                "id": id,
                "user_id": ARTISAN_ID,
                "timestamp": timestamp,
                "gps": { "lat": lat, "lng": lng, "isManual": is_manual }
            }
        }),
    )
}

async fn register_home(app: &Router, (lat, lng): (f64, f64)) {
    let (status, _) = send(
        app,
        json_request(
            Method::PUT,
            &format!("/api/v1/artisans/{ARTISAN_ID}/home"),
            json!({ "home_lat": lat, "home_lng": lng }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Fraud boundary
// ============================================================================

#[tokio::test]
async fn test_clean_log_scores_zero() {
    let app = app().await;
    register_home(&app, CUSCO).await;

    let (status, body) = send(&app, fraud_request("log-1", CUSCO, "2024-06-01T10:00:00Z", false)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "fraudScore": 0, "isFlagged": false, "reasons": [] })
    );
}

#[tokio::test]
async fn test_manual_location_is_flagged() {
    let app = app().await;

    let (status, body) = send(&app, fraud_request("log-1", CUSCO, "2024-06-01T10:00:00Z", true)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fraudScore"], 100);
    assert_eq!(body["isFlagged"], true);
    assert_eq!(body["reasons"], json!([MOCK_LOCATION_REASON]));
}

#[tokio::test]
async fn test_deviation_and_speed_combine_into_a_flag() {
    let app = app().await;
    register_home(&app, CUSCO).await;

    let (_, first) = send(&app, fraud_request("log-1", CUSCO, "2024-06-01T10:00:00Z", false)).await;
    assert_eq!(first["fraudScore"], 0);

    // ~100 km in 30 minutes, far from the workshop
    let (status, second) =
        send(&app, fraud_request("log-2", ABANCAY, "2024-06-01T10:30:00Z", false)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["fraudScore"], 90);
    assert_eq!(second["isFlagged"], true);
    let reasons = second["reasons"].as_array().unwrap();
    assert_eq!(reasons.len(), 2);
    assert!(reasons[0].as_str().unwrap().starts_with("Location Deviation (>2km from Home:"));
    assert!(reasons[1].as_str().unwrap().starts_with("Impossible Travel Speed ("));

    // verdict is queryable and listed as flagged
    let (status, verdict) = send(
        &app,
        Request::get("/api/v1/logs/log-2/verdict").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["fraudScore"], 90);
    assert_eq!(verdict["user_id"], ARTISAN_ID);

    let (_, flagged) = send(
        &app,
        Request::get("/api/v1/verdicts/flagged?limit=10").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(flagged.as_array().unwrap().len(), 1);
    assert_eq!(flagged[0]["log_id"], "log-2");
}

#[tokio::test]
async fn test_reevaluation_is_idempotent() {
    let app = app().await;
    register_home(&app, CUSCO).await;

    let (_, first) = send(&app, fraud_request("log-1", ABANCAY, "2024-06-01T10:00:00Z", false)).await;
    let (_, again) = send(&app, fraud_request("log-1", ABANCAY, "2024-06-01T10:00:00Z", false)).await;

    // the log never counts as its own prior
    assert_eq!(first, again);
    assert_eq!(again["fraudScore"], 40);
}

#[tokio::test]
async fn test_missing_gps_is_rejected() {
    let app = app().await;

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/functions/v1/fraud-detection",
            json!({ "record": { "id": "log-1", "user_id": ARTISAN_ID } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing record or GPS data" }));

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/functions/v1/fraud-detection", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing record or GPS data" }));
}

#[tokio::test]
async fn test_malformed_body_gets_flat_error() {
    let app = app().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/functions/v1/fraud-detection")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = app().await;

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/functions/v1/fraud-detection")
        .header(header::ORIGIN, "https://app.example.org")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "authorization,x-client-info,apikey,content-type",
        )
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("x-client-info"));
    assert!(allowed.contains("apikey"));
}

// ============================================================================
// Records and artisans
// ============================================================================

#[tokio::test]
async fn test_record_upsert_is_idempotent() {
    let app = app().await;
    let uri = "/api/v1/records/logs/log-1";

    let (status, body) = send(&app, json_request(Method::PUT, uri, json!({"id": "log-1", "v": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);

    let (status, body) = send(&app, json_request(Method::PUT, uri, json!({"id": "log-1", "v": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);

    let (status, body) = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["v"], 2);
}

#[tokio::test]
async fn test_stored_log_is_scored_on_upsert() {
    let app = app().await;
    register_home(&app, CUSCO).await;

    let log = ProvenanceLog::new(
        Stage::Creation,
        "Weaving 2h",
        Some(GeoLocation::fallback(GeoErrorCode::Unsupported)),
        "device-test",
    )
    .with_user(ARTISAN_ID);
    let uri = format!("/api/v1/records/logs/{}", log.id);

    let (status, body) = send(
        &app,
        json_request(Method::PUT, &uri, serde_json::to_value(&log).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    // fallback sentinel: manual entry, and far from the workshop
    assert_eq!(body["verdict"]["fraudScore"], 140);
    assert_eq!(body["verdict"]["isFlagged"], true);

    let (_, stored) = send(&app, Request::get(uri.as_str()).body(Body::empty()).unwrap()).await;
    assert_eq!(stored["fraudScore"], 140);
    assert_eq!(stored["isFlagged"], true);
    assert!(stored["flagReason"].as_str().unwrap().contains(MOCK_LOCATION_REASON));

    let (status, verdict) = send(
        &app,
        Request::get(format!("/api/v1/logs/{}/verdict", log.id).as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["user_id"], ARTISAN_ID);

    // a re-upsert replaces the payload and is scored again
    let (status, body) = send(
        &app,
        json_request(Method::PUT, &uri, serde_json::to_value(&log).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"]["fraudScore"], 140);
    let (_, stored) = send(&app, Request::get(uri.as_str()).body(Body::empty()).unwrap()).await;
    assert_eq!(stored["isFlagged"], true);
}

#[tokio::test]
async fn test_unscorable_log_is_still_stored() {
    let app = app().await;

    let (status, body) = send(
        &app,
        json_request(Method::PUT, "/api/v1/records/logs/raw-1", json!({ "id": "raw-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["verdict"].is_null());

    let (status, _) = send(
        &app,
        Request::get("/api/v1/logs/raw-1/verdict").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_endpoint_is_404() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(json_request(Method::PUT, "/api/v1/records/orders/o-1", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-error-code"], "UNKNOWN_ENDPOINT");

    let (status, body) = send(
        &app,
        Request::get("/api/v1/records/logs/missing").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
}

#[tokio::test]
async fn test_home_facility_validation() {
    let app = app().await;

    let (status, body) = send(
        &app,
        json_request(
            Method::PUT,
            "/api/v1/artisans/a-1/home",
            json!({ "home_lat": 123.0, "home_lng": 0.0 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FIELD_VALUE");
    assert_eq!(body["error"]["details"]["field"], "home_lat");
}

// ============================================================================
// Health and metrics
// ============================================================================

#[tokio::test]
async fn test_health_ready_and_metrics() {
    let app = app().await;

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "connected");

    send(&app, fraud_request("log-1", CUSCO, "2024-06-01T10:00:00Z", true)).await;

    let (status, body) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("provenance_fraud_evaluations 1"));
    assert!(text.contains("provenance_fraud_flagged 1"));
    assert!(text.contains("provenance_fraud_latency_seconds"));
}
