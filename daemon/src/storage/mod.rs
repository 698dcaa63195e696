pub mod file;
pub mod fleet_store;
