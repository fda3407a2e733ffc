//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! service layer for business logic.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::Utc;
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;

use super::dto::{
    DailyReading, HealthResponse, InsertData, InsertDataResponse, MonthlySummary, SampleDto,
    SampleRequest, ScopeQuery, WeeklySummary, WireChange,
};
use super::error::AppError;
use super::state::AppState;
use crate::db::services as db_services;
use crate::models::{NewSample, SampleId, Scope};
use crate::services::views;

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let db_status = match db_services::health_check(state.repository.as_ref()).await {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: "v1".to_string(),
        database: db_status,
        connections: state.hub.connection_count(),
    }))
}

// =============================================================================
// Legacy device endpoints
// =============================================================================

/// POST /insertData
///
/// Store one reading from a device. Any missing or zero BPM value is rejected.
pub async fn insert_data(
    State(state): State<AppState>,
    Json(body): Json<InsertData>,
) -> Result<(StatusCode, Json<InsertDataResponse>), AppError> {
    let sample = body
        .into_new_sample()
        .ok_or_else(|| AppError::BadRequest("Invalid data".to_string()))?;
    let stored = db_services::store_sample(state.repository.as_ref(), &sample).await?;

    Ok((
        StatusCode::CREATED,
        Json(InsertDataResponse {
            message: "Data inserted successfully".to_string(),
            data: stored.into(),
        }),
    ))
}

/// GET /maxHR
///
/// The most recent reading as a zero- or one-element array.
pub async fn max_hr(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> HandlerResult<Vec<SampleDto>> {
    let scope = query.scope();
    let latest = db_services::latest_sample(state.repository.as_ref(), scope.as_ref()).await?;
    Ok(Json(latest.into_iter().map(SampleDto::from).collect()))
}

// =============================================================================
// Samples
// =============================================================================

/// POST /v1/samples
pub async fn create_sample(
    State(state): State<AppState>,
    Json(request): Json<SampleRequest>,
) -> Result<(StatusCode, Json<SampleDto>), AppError> {
    let owner = request.scope.as_deref().and_then(Scope::parse);
    let sample = NewSample::new(owner, request.heart_rate());
    let stored = db_services::store_sample(state.repository.as_ref(), &sample).await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

/// PUT /v1/samples/{id}
pub async fn update_sample(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SampleRequest>,
) -> HandlerResult<SampleDto> {
    let updated = db_services::update_sample(
        state.repository.as_ref(),
        SampleId::new(id),
        request.heart_rate(),
    )
    .await?;
    Ok(Json(updated.into()))
}

/// DELETE /v1/samples/{id}
///
/// Subscribers receive the `delete` followed by the owner's new `latest`.
pub async fn delete_sample(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    db_services::delete_sample(state.repository.as_ref(), SampleId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/samples/latest?scope=
pub async fn latest_sample(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> HandlerResult<SampleDto> {
    let scope = query.scope();
    db_services::latest_sample(state.repository.as_ref(), scope.as_ref())
        .await?
        .map(|sample| Json(sample.into()))
        .ok_or_else(|| match scope {
            Some(scope) => AppError::NotFound(format!("No samples for {}", scope)),
            None => AppError::NotFound("No samples".to_string()),
        })
}

// =============================================================================
// Aggregated views
// =============================================================================

/// GET /api/heart-rate/daily?scope=
pub async fn get_daily(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> HandlerResult<Vec<DailyReading>> {
    let scope = query.scope();
    let readings =
        views::daily_readings(state.repository.as_ref(), scope.as_ref(), Utc::now()).await?;
    Ok(Json(readings))
}

/// GET /api/heart-rate/weekly?scope=
pub async fn get_weekly(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> HandlerResult<Vec<WeeklySummary>> {
    let scope = query.scope();
    let summary =
        views::weekly_summary(state.repository.as_ref(), scope.as_ref(), Utc::now()).await?;
    Ok(Json(summary))
}

/// GET /api/heart-rate/monthly?scope=
pub async fn get_monthly(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> HandlerResult<Vec<MonthlySummary>> {
    let scope = query.scope();
    let summary =
        views::monthly_summary(state.repository.as_ref(), scope.as_ref(), Utc::now()).await?;
    Ok(Json(summary))
}

// =============================================================================
// Server-Sent Events
// =============================================================================

/// GET /v1/scopes/{scope}/events
///
/// Read-only change stream for one scope. The SSE event name is the hub
/// channel (`changeUpdate` or `changeUpdate:<scope>`).
pub async fn stream_scope_events(
    State(state): State<AppState>,
    Path(scope): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let scope = Scope::parse(&scope)
        .ok_or_else(|| AppError::BadRequest("Scope must not be blank".to_string()))?;

    let (guard, mut receiver) = state.hub.connect_guarded();
    guard.join(scope.clone());
    tracing::info!(connection = %guard.id(), %scope, "SSE subscriber attached");

    let stream = async_stream::stream! {
        // Dropping the stream drops the guard and leaves the hub.
        let _guard = guard;
        while let Some(message) = receiver.recv().await {
            let wire = WireChange::from(message.event.as_ref());
            let data = match serde_json::to_string(&wire) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Skipping unserializable change: {}", e);
                    continue;
                }
            };
            yield Ok(Event::default().event(message.channel.as_ref()).data(data));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
