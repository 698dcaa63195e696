pub mod classifier;
pub mod hub;
pub mod monitor;
pub mod process;
pub mod properties;
pub mod registry;
pub mod server;
