#![allow(dead_code)]

use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // The catalog subsystem and the quiz grader call these endpoints from
    // other services; CORS stays permissive inside the service mesh.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", api_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::trace::request_id_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        // Catalog mutations (each fires its unlock trigger)
        .route(
            "/courses/{course_id}/units",
            post(handlers::catalog::create_unit),
        )
        .route("/units/{unit_id}", delete(handlers::catalog::delete_unit))
        .route(
            "/courses/{course_id}/videos",
            post(handlers::catalog::create_video),
        )
        // Collaborator writes into progress records
        .route("/progress/quiz-pass", post(handlers::progress::quiz_result))
        .route(
            "/progress/video-watched",
            post(handlers::progress::video_watched),
        )
        .route(
            "/progress/reading-complete",
            post(handlers::progress::reading_complete),
        )
        // Repair + read projection
        .route(
            "/courses/{course_id}/recalculate",
            post(handlers::progress::recalculate),
        )
        .route(
            "/courses/{course_id}/students/{student_id}/view",
            get(handlers::progress::student_view),
        )
}
