use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use tower_http::cors::CorsLayer;

pub mod chunkers;
pub mod comparison;
pub mod config;
pub mod error;
pub mod providers;
pub mod routes;
pub mod storage;
pub mod utils;

use chunkers::ChunkerRegistry;
use comparison::ComparisonService;
use config::AppConfig;
use providers::ConverterRegistry;
use storage::{
    FsResultStore, FsResultStoreConfig, JsonTaskStore, JsonTaskStoreConfig, ResultStore,
    StorageManager, TaskStore,
};

/// Process-scoped handles shared by the HTTP layer and the CLI.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub converters: Arc<ConverterRegistry>,
    pub chunkers: Arc<ChunkerRegistry>,
    pub comparisons: Arc<ComparisonService>,
}

impl AppState {
    /// Resolves providers, opens the stores under `working_dir` and wires the service.
    ///
    /// The returned manager owns store lifecycles; call `finalize_all` on shutdown.
    pub async fn build(config: AppConfig) -> Result<(Arc<AppState>, StorageManager)> {
        let converters = Arc::new(ConverterRegistry::from_config(
            &config.providers,
            &config.comparison,
        ));
        let chunkers = Arc::new(ChunkerRegistry::with_defaults(
            config.comparison.chunk_timeout(),
        ));
        Self::with_registries(config, converters, chunkers).await
    }

    pub async fn with_registries(
        config: AppConfig,
        converters: Arc<ConverterRegistry>,
        chunkers: Arc<ChunkerRegistry>,
    ) -> Result<(Arc<AppState>, StorageManager)> {
        let tasks: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::new(JsonTaskStoreConfig::new(
            config.working_dir.clone(),
        )));
        let results: Arc<dyn ResultStore> = Arc::new(FsResultStore::new(
            FsResultStoreConfig::new(config.working_dir.clone()),
        ));

        let mut storage_manager = StorageManager::new();
        storage_manager.register_tasks(tasks.clone());
        storage_manager.register_results(results.clone());
        storage_manager
            .initialize_all()
            .await
            .context("Failed to initialize storages")?;

        let comparisons = Arc::new(ComparisonService::new(
            config.comparison.clone(),
            converters.clone(),
            chunkers.clone(),
            tasks,
            results,
        ));

        let state = Arc::new(AppState {
            config: Arc::new(config),
            converters,
            chunkers,
            comparisons,
        });
        Ok((state, storage_manager))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.server.max_upload_mb * 1024 * 1024;
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::library_routes())
        .merge(routes::convert_routes())
        .merge(routes::chunker_routes())
        .merge(routes::task_routes())
        .merge(routes::download_routes())
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
