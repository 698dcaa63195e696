use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a supervised server process.
///
/// Transitions only ever follow
/// `STOPPED -> STARTING -> STARTED -> STOPPING -> STOPPED`, with the
/// shortcut `STARTING/STARTED/STOPPING -> STOPPED` taken whenever the
/// process exits for any reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ServerState {
    /// True for every state in which an OS process handle exists.
    pub fn is_running(&self) -> bool {
        !matches!(self, ServerState::Stopped)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Stopped => "STOPPED",
            ServerState::Starting => "STARTING",
            ServerState::Started => "STARTED",
            ServerState::Stopping => "STOPPING",
        };
        f.write_str(s)
    }
}
