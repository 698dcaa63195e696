use std::sync::Arc;

use log::{debug, error};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use super::driver::Driver;

/// Runs every enabled driver until ctrl+c arrives, then wakes `stop_notify`
/// so the drivers and the rest of the daemon can wind down in order.
pub struct GracefulShutdown {
    drivers: Vec<Arc<dyn Driver>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self { drivers: vec![] }
    }

    pub fn add_driver(&mut self, driver: impl Driver + 'static) {
        self.drivers.push(Arc::new(driver));
    }

    pub async fn watch(mut self, stop_notify: Arc<Notify>) {
        let mut tasks = JoinSet::new();
        debug!("watching {} driver(s) for shutdown", self.drivers.len());

        for driver in self.drivers.drain(..) {
            tasks.spawn(async move { driver.run().await });
        }
        tasks.spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("could not install the ctrl+c handler: {}", err);
            }
            stop_notify.notify_waiters();
        });

        tasks.join_all().await;
    }
}
