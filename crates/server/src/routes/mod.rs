use axum::{
    Router, middleware,
    routing::{IntoMakeService, get},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{AppState, middleware as app_middleware};

pub mod ai;
pub mod video;

async fn health_check() -> &'static str {
    "ok"
}

/// API under `/api`, rendered reels under `/output`.
pub fn app(state: AppState) -> Router {
    let output = ServeDir::new(&state.output_dir);

    let base_routes = Router::new()
        .route("/health", get(health_check))
        .merge(video::router())
        .merge(ai::router())
        .with_state(state);

    Router::new()
        .nest("/api", base_routes)
        .nest_service("/output", output)
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    app(state).into_make_service()
}
