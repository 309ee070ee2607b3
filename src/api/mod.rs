pub mod dto;
pub mod errors;
pub mod handlers;

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{control::DeviceBridge, sensors::TimeSeriesReader, startup_time::StartupTimeStore};
use handlers::ApiDoc;

/// Everything the handlers reach into. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub bridge: DeviceBridge,
    pub reader: Arc<dyn TimeSeriesReader>,
    pub startup: Arc<dyn StartupTimeStore>,
    /// Deadline for each `/api/data` query.
    pub query_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/light", get(handlers::get_light).post(handlers::toggle_light))
        .route("/api/ph", post(handlers::adjust_ph))
        .route("/api/soil", post(handlers::add_soil))
        .route("/api/water", post(handlers::add_water))
        .route("/api/data", get(handlers::get_data))
        .route("/api/time", get(handlers::get_time).post(handlers::set_time))
        .with_state(state)
        .split_for_parts();

    router
        .route("/healthcheck", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
