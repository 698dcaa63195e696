pub mod command;
pub mod event;
pub mod report;
pub mod state;

pub use command::ApiRequest;
pub use event::PushMessage;
pub use report::{LastBackup, MonitorSample, ServerDetail, ServerSummary};
pub use state::ServerState;
