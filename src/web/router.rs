use axum::{
    Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    gate, modules,
    web::{AppState, admin, auth},
};

pub fn build_router(state: AppState) -> Router {
    let request_gate = state.gate();

    Router::new()
        .route("/healthz", get(healthz))
        .route("/admin", get(admin::dashboard))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .merge(modules::members::router())
        .merge(modules::announcements::router())
        .merge(modules::events::router())
        .merge(modules::projects::router())
        .merge(modules::comments::router())
        .merge(modules::forum::router())
        .merge(modules::sponsors::router())
        .merge(modules::inventory::router())
        .merge(modules::access::router())
        .merge(modules::media_kit::router())
        .merge(modules::analytics::router())
        .merge(modules::translations::router())
        .with_state(state)
        .layer(middleware::from_fn_with_state(request_gate, gate::enforce))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
