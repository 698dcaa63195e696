mod behavior;
mod config;
mod connection;
mod driver;

pub use config::WsDriverConfig;
pub use connection::*;
pub use driver::WsDriver;
