use std::sync::Arc;

use crate::config::Config;
use crate::models::UnitStatus;
use mongodb::Client as MongoClient;

pub mod catalog;
pub mod memory;
pub mod progress_store;
pub mod unlock_service;
pub mod view_service;

pub use catalog::{CourseCatalog, MongoCatalog};
pub use progress_store::{MongoProgressStore, ProgressStore};

/// Errors surfaced by the unlock engine and its stores.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },

    #[error("duplicate unit order {order} in course {course_id}")]
    DuplicateOrder { course_id: String, order: i32 },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            what,
            id: id.into(),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub catalog: Arc<dyn CourseCatalog>,
    pub progress: Arc<dyn ProgressStore>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Verifying MongoDB connection...");
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            mongo.run_command(mongodb::bson::doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| anyhow::anyhow!("MongoDB ping timeout after 5s"))??;
        tracing::info!("MongoDB connection established");

        Ok(Self {
            config,
            catalog: Arc::new(MongoCatalog::new(mongo.clone())),
            progress: Arc::new(MongoProgressStore::new(mongo)),
        })
    }

    /// Build state over arbitrary store backends. The test suite uses this
    /// with the in-memory implementations.
    pub fn with_stores(
        config: Config,
        catalog: Arc<dyn CourseCatalog>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            config,
            catalog,
            progress,
        }
    }
}
