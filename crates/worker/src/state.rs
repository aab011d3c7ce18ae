use std::sync::Arc;

use genforge_events::ConnectionRegistry;
use genforge_pipeline::JobService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, used by the health check.
    pub pool: genforge_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Job service owning the per-provider engines.
    pub service: Arc<JobService>,
    /// Live client connections keyed by owner.
    pub registry: Arc<ConnectionRegistry>,
}
