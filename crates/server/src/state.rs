//! Application state
//!
//! Shared across all handlers: the retrieval `Pipeline` (which owns its
//! own collaborators and background tasks) plus the live `Settings` for
//! hot-reload.

use std::sync::Arc;

use parking_lot::RwLock;

use metrics_exporter_prometheus::PrometheusHandle;
use ragbridge_config::{load_settings, Settings};
use ragbridge_retrieval::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub metrics: PrometheusHandle,
    config: Arc<RwLock<Settings>>,
    env: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, metrics: PrometheusHandle, config: Settings, env: Option<String>) -> Self {
        Self {
            pipeline,
            metrics,
            config: Arc::new(RwLock::new(config)),
            env,
        }
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }

    /// Reloads `server`/`query`/`scope_ranges`/... from disk. Collaborators
    /// constructed at startup (embedder, document store, LLM client) are not
    /// re-created; only the values handlers read through `get_config` move.
    pub fn reload_config(&self) -> Result<(), String> {
        let new_config =
            load_settings(self.env.as_deref()).map_err(|e| format!("failed to reload config: {e}"))?;
        *self.config.write() = new_config;
        tracing::info!("configuration reloaded");
        Ok(())
    }
}
