pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod monitor;
pub mod server;
pub mod sink;
pub mod store;

use std::sync::Arc;

use monitor::MonitorService;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Ingestion facade; handlers only ever call `collect` and `lookup`.
    pub monitor: Arc<MonitorService>,
}
