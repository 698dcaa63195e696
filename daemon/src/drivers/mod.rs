mod config;
mod driver;
mod graceful_shutdown;
pub mod websocket;

use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::drivers::websocket::WsDriver;

pub use config::{DriversConfig, ListenConfig};
pub use driver::Driver;
pub use graceful_shutdown::GracefulShutdown;

/// The command surfaces this build knows how to construct. Only the
/// WebSocket driver exists today; the indirection keeps the config format
/// stable if more are added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Drivers {
    Websocket,
}

impl Drivers {
    pub fn new_driver(&self, app_state: AppState) -> impl Driver {
        match self {
            Drivers::Websocket => WsDriver::new(app_state),
        }
    }
}
