use anyhow::Context;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::drivers::websocket::WsConnManager;
use crate::drivers::GracefulShutdown;
use crate::management::registry::FleetRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ApplicationState {
    pub stop_notify: Arc<Notify>,
    pub registry: Arc<FleetRegistry>,
    pub ws_connections: Mutex<Vec<JoinHandle<()>>>,
    pub ws_conn_manager: WsConnManager,
}
pub type AppState = Arc<ApplicationState>;

impl ApplicationState {
    /// Tracks a connection task for the shutdown drain, dropping handles of
    /// connections that have already finished so the list stays bounded by
    /// the number of live sockets.
    pub async fn track_ws_connection(&self, handle: JoinHandle<()>) {
        let mut handles = self.ws_connections.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

pub async fn run_app() -> anyhow::Result<()> {
    let config = AppConfig::get();
    debug!(
        "config loaded: {}",
        serde_json::to_string_pretty(&config).unwrap()
    );

    let registry = Arc::new(
        FleetRegistry::new(config.fleet.clone(), config.mysql.clone())
            .context("failed to initialize the fleet registry")?,
    );
    registry.load().await.context("failed to load the fleet")?;

    let state: AppState = Arc::new(ApplicationState {
        stop_notify: Arc::new(Notify::new()),
        registry: registry.clone(),
        ws_connections: Mutex::new(vec![]),
        ws_conn_manager: WsConnManager::new(),
    });

    let mut gs = GracefulShutdown::new();
    config
        .drivers
        .enabled
        .iter()
        .for_each(|driver_type| gs.add_driver(driver_type.new_driver(state.clone())));

    gs.watch(state.stop_notify.clone()).await;

    registry.shutdown().await;
    info!("Bye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use pretty_assertions::assert_eq;

    fn state_in(dir: &tempfile::TempDir) -> ApplicationState {
        let fleet = FleetConfig {
            base_dir: dir.path().to_path_buf(),
            ..FleetConfig::default()
        };
        ApplicationState {
            stop_notify: Arc::new(Notify::new()),
            registry: Arc::new(FleetRegistry::new(fleet, None).unwrap()),
            ws_connections: Mutex::new(vec![]),
            ws_conn_manager: WsConnManager::new(),
        }
    }

    #[tokio::test]
    async fn finished_connection_handles_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let done = tokio::spawn(async {});
        while !done.is_finished() {
            tokio::task::yield_now().await;
        }
        state.track_ws_connection(done).await;
        assert_eq!(state.ws_connections.lock().await.len(), 1);

        // tracking a live connection sweeps out the finished one
        let live = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        state.track_ws_connection(live).await;
        let handles = state.ws_connections.lock().await;
        assert_eq!(handles.len(), 1);
        assert!(!handles[0].is_finished());
    }
}
