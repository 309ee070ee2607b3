use axum::{
    extract::{Query, State},
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{DataQuery, LightStateDto, MessageDto, PhCommandDto, SensorRecordDto, StartupTimeDto},
    errors::AppError,
    AppState,
};
use crate::sensors::{Cancellation, QueryRange};

// ---------------------------------------------------------------------------
// Device commands
// ---------------------------------------------------------------------------

/// Current light state as last reported by the controller.
#[utoipa::path(
    get,
    path = "/api/light",
    responses(
        (status = 200, description = "Last reported light state", body = LightStateDto),
    ),
    tag = "device"
)]
pub async fn get_light(State(state): State<AppState>) -> Json<LightStateDto> {
    Json(LightStateDto {
        is_up: state.bridge.light_state(),
    })
}

/// Toggle the grow light. Returns once the command is handed to the broker.
#[utoipa::path(
    post,
    path = "/api/light",
    responses(
        (status = 200, description = "Command submitted", body = MessageDto),
        (status = 500, description = "Broker unavailable"),
    ),
    tag = "device"
)]
pub async fn toggle_light(State(state): State<AppState>) -> Result<Json<MessageDto>, AppError> {
    state.bridge.toggle_light()?;
    Ok(Json(MessageDto::ok()))
}

#[utoipa::path(
    post,
    path = "/api/ph",
    request_body = PhCommandDto,
    responses(
        (status = 200, description = "Command submitted", body = MessageDto),
        (status = 500, description = "Broker unavailable"),
    ),
    tag = "device"
)]
pub async fn adjust_ph(
    State(state): State<AppState>,
    Json(body): Json<PhCommandDto>,
) -> Result<Json<MessageDto>, AppError> {
    if body.up {
        state.bridge.send_up_ph()?;
    } else {
        state.bridge.send_down_ph()?;
    }
    Ok(Json(MessageDto::ok()))
}

#[utoipa::path(
    post,
    path = "/api/soil",
    responses(
        (status = 200, description = "Command submitted", body = MessageDto),
        (status = 500, description = "Broker unavailable"),
    ),
    tag = "device"
)]
pub async fn add_soil(State(state): State<AppState>) -> Result<Json<MessageDto>, AppError> {
    state.bridge.add_soil()?;
    Ok(Json(MessageDto::ok()))
}

#[utoipa::path(
    post,
    path = "/api/water",
    responses(
        (status = 200, description = "Command submitted", body = MessageDto),
        (status = 500, description = "Broker unavailable"),
    ),
    tag = "device"
)]
pub async fn add_water(State(state): State<AppState>) -> Result<Json<MessageDto>, AppError> {
    state.bridge.add_water()?;
    Ok(Json(MessageDto::ok()))
}

// ---------------------------------------------------------------------------
// Sensor data
// ---------------------------------------------------------------------------

/// Sensor records in `[s, e]`, one per timestamp, oldest first.
#[utoipa::path(
    get,
    path = "/api/data",
    params(DataQuery),
    responses(
        (status = 200, description = "Sensor records", body = Vec<SensorRecordDto>),
        (status = 400, description = "Range start is after its end"),
        (status = 504, description = "Query exceeded its deadline"),
        (status = 500, description = "Time-series store failure"),
    ),
    tag = "sensors"
)]
pub async fn get_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Vec<SensorRecordDto>>, AppError> {
    let range = QueryRange::new(query.s, query.e)?;
    let records = state
        .reader
        .query(range, Cancellation::after(state.query_timeout))
        .await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

// ---------------------------------------------------------------------------
// Startup time
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/time",
    responses(
        (status = 200, description = "Stored startup time", body = StartupTimeDto),
        (status = 404, description = "No startup time recorded yet"),
    ),
    tag = "time"
)]
pub async fn get_time(State(state): State<AppState>) -> Result<Json<StartupTimeDto>, AppError> {
    let last_time = state.startup.load().await?;
    Ok(Json(StartupTimeDto { last_time }))
}

#[utoipa::path(
    post,
    path = "/api/time",
    request_body = StartupTimeDto,
    responses(
        (status = 200, description = "Startup time stored", body = MessageDto),
        (status = 500, description = "Storage failure"),
    ),
    tag = "time"
)]
pub async fn set_time(
    State(state): State<AppState>,
    Json(body): Json<StartupTimeDto>,
) -> Result<Json<MessageDto>, AppError> {
    state.startup.store(body.last_time).await?;
    Ok(Json(MessageDto::ok()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/healthcheck",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_light, toggle_light, adjust_ph, add_soil, add_water, get_data, get_time, set_time, health),
    components(schemas(SensorRecordDto, LightStateDto, PhCommandDto, StartupTimeDto, MessageDto)),
    tags(
        (name = "device",  description = "Controller commands and state"),
        (name = "sensors", description = "Historical sensor data"),
        (name = "time",    description = "Startup time marker"),
        (name = "system",  description = "System endpoints"),
    ),
    info(
        title = "Hydroponic Gateway API",
        version = "0.1.0",
        description = "REST gateway for a hydroponic controller"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
