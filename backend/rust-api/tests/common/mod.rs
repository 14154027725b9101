use std::sync::Arc;

use axum::{body::Body, http::Request, response::Response, Router};
use coursegate_api::{
    config::Config,
    create_router,
    services::memory::{MemoryCatalog, MemoryProgressStore},
    services::AppState,
};
use http_body_util::BodyExt;
use mongodb::bson::oid::ObjectId;

pub struct TestContext {
    pub catalog: Arc<MemoryCatalog>,
    pub progress: Arc<MemoryProgressStore>,
    pub app: Router,
}

pub fn create_test_app() -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let catalog = Arc::new(MemoryCatalog::new());
    let progress = Arc::new(MemoryProgressStore::new());
    let app_state = Arc::new(AppState::with_stores(
        Config::for_tests(),
        catalog.clone(),
        progress.clone(),
    ));

    TestContext {
        catalog,
        progress,
        app: create_router(app_state),
    }
}

/// Seed a unit through the catalog without going through HTTP.
pub async fn seed_unit(
    catalog: &MemoryCatalog,
    course_id: ObjectId,
    title: &str,
    order: i32,
) -> coursegate_api::models::UnitRecord {
    let unit = catalog.build_unit(course_id, title, order);
    coursegate_api::services::CourseCatalog::insert_unit(catalog, &unit)
        .await
        .expect("insert_unit should succeed");
    unit
}

/// Seed a video through the catalog without going through HTTP.
pub async fn seed_video(
    catalog: &MemoryCatalog,
    course_id: ObjectId,
    unit_id: Option<ObjectId>,
    title: &str,
    sequence: i32,
) -> coursegate_api::models::VideoRecord {
    let video = catalog.build_video(course_id, unit_id, title, sequence);
    coursegate_api::services::CourseCatalog::insert_video(catalog, &video)
        .await
        .expect("insert_video should succeed");
    video
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}
