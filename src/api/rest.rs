//! REST API endpoints for the provenance server.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::error::{validation_error, ApiError, ErrorCode, FraudBoundaryError};
use crate::domain::{
    Endpoint, FraudRecord, FraudRequest, FraudResponse, FraudVerdict, HomeFacility, ProvenanceLog,
};
use crate::infra::sqlite::StoredVerdict;
use crate::metrics::{metric_names, timed};
use crate::server::AppState;

const DEFAULT_FLAGGED_LIMIT: u32 = 50;
const MAX_FLAGGED_LIMIT: u32 = 500;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/records/:endpoint/:id",
            put(put_record).get(get_record),
        )
        .route("/v1/artisans/:user_id/home", put(put_home_facility))
        .route("/v1/logs/:log_id/verdict", get(get_verdict))
        .route("/v1/verdicts/flagged", get(list_flagged))
}

/// Build the `/functions` router hosting the fraud boundary.
pub fn functions_router() -> Router<AppState> {
    Router::new().route("/v1/fraud-detection", post(fraud_detection))
}

fn parse_endpoint(raw: &str) -> Result<Endpoint, ApiError> {
    raw.parse::<Endpoint>()
        .map_err(|e| ApiError::new(ErrorCode::UnknownEndpoint, e).with_resource_id(raw))
}

// ============================================================================
// Records
// ============================================================================

async fn put_record(
    State(state): State<AppState>,
    Path((endpoint, id)): Path<(String, String)>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let endpoint = parse_endpoint(&endpoint)?;
    let Json(payload) =
        body.map_err(|e| ApiError::new(ErrorCode::InvalidRequestBody, e.body_text()))?;

    let created = state.records.put(endpoint, &id, &payload).await?;
    state
        .metrics
        .inc_counter(metric_names::RECORDS_RECEIVED)
        .await;
    debug!(%endpoint, id = %id, created, "Record stored");

    let verdict = match endpoint {
        Endpoint::Logs => evaluate_stored_log(&state, &id, &payload).await,
        _ => None,
    };

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({
            "endpoint": endpoint.as_str(),
            "id": id,
            "created": created,
            "verdict": verdict,
        })),
    ))
}

/// Score a log as soon as it is stored. The upsert stands even when the
/// log cannot be scored.
async fn evaluate_stored_log(
    state: &AppState,
    id: &str,
    payload: &serde_json::Value,
) -> Option<FraudVerdict> {
    let log: ProvenanceLog = match serde_json::from_value(payload.clone()) {
        Ok(log) => log,
        Err(e) => {
            debug!(log_id = %id, error = %e, "Stored log is not a provenance log, not scored");
            return None;
        }
    };

    let mut record = FraudRecord::from_log(&log, None);
    record.id = id.to_string();
    if record.gps.is_none() {
        debug!(log_id = %id, "Stored log has no location, not scored");
        return None;
    }

    match timed(
        &state.metrics,
        metric_names::FRAUD_LATENCY,
        state.fraud.evaluate_record(record),
    )
    .await
    {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            warn!(log_id = %id, error = %e, "Failed to score stored log");
            None
        }
    }
}

async fn get_record(
    State(state): State<AppState>,
    Path((endpoint, id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let endpoint = parse_endpoint(&endpoint)?;
    match state.records.get(endpoint, &id).await? {
        Some(payload) => Ok(Json(payload)),
        None => Err(ApiError::new(
            ErrorCode::ResourceNotFound,
            format!("No {endpoint} record {id}"),
        )
        .with_resource_id(id)),
    }
}

// ============================================================================
// Artisans
// ============================================================================

async fn put_home_facility(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<HomeFacility>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(home) =
        body.map_err(|e| ApiError::new(ErrorCode::InvalidRequestBody, e.body_text()))?;

    if !(-90.0..=90.0).contains(&home.home_lat) {
        return Err(validation_error("home_lat", "latitude must be within [-90, 90]"));
    }
    if !(-180.0..=180.0).contains(&home.home_lng) {
        return Err(validation_error("home_lng", "longitude must be within [-180, 180]"));
    }

    state.evidence.set_home_facility(&user_id, home).await?;
    info!(user_id = %user_id, lat = home.home_lat, lng = home.home_lng, "Home facility registered");

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "home_lat": home.home_lat,
        "home_lng": home.home_lng,
    })))
}

// ============================================================================
// Verdicts
// ============================================================================

async fn get_verdict(
    State(state): State<AppState>,
    Path(log_id): Path<String>,
) -> Result<Json<StoredVerdict>, ApiError> {
    state.evidence.verdict(&log_id).await?.map(Json).ok_or_else(|| {
        ApiError::new(
            ErrorCode::ResourceNotFound,
            format!("Log {log_id} has not been evaluated"),
        )
        .with_resource_id(log_id)
    })
}

#[derive(Debug, Deserialize)]
struct FlaggedQuery {
    limit: Option<u32>,
}

async fn list_flagged(
    State(state): State<AppState>,
    Query(query): Query<FlaggedQuery>,
) -> Result<Json<Vec<StoredVerdict>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FLAGGED_LIMIT)
        .clamp(1, MAX_FLAGGED_LIMIT);
    Ok(Json(state.evidence.flagged(limit).await?))
}

// ============================================================================
// Fraud boundary
// ============================================================================

/// `POST /functions/v1/fraud-detection`
///
/// Answers `200` with the verdict, or `400 { "error": string }` for an
/// unreadable body or a record without GPS.
async fn fraud_detection(
    State(state): State<AppState>,
    body: Result<Json<FraudRequest>, JsonRejection>,
) -> Result<Json<FraudResponse>, FraudBoundaryError> {
    let Json(request) = body.map_err(|e| FraudBoundaryError::new(e.body_text()))?;

    let verdict = timed(
        &state.metrics,
        metric_names::FRAUD_LATENCY,
        state.fraud.evaluate_request(request),
    )
    .await?;

    Ok(Json(FraudResponse::from(verdict)))
}
