use serde::{Deserialize, Serialize};

/// Inbound command envelope, `{"type": ..., "value": ...}` on the wire.
/// Per-server operations carry the target slug as a bare string value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiRequest {
    // fleet queries
    RequestServersList,

    // subscriptions
    SubscribeServersDetail,
    UnsubscribeServersDetail,
    SubscribeServerDetail(String),
    UnsubscribeServerDetail(String),
    SubscribeServerConsole(String),
    UnsubscribeServerConsole(String),

    // process lifecycle
    StartServer(String),
    StopServer(String),
    RestartServer(String),
    KillServer(String),
    ServerCommand {
        server: String,
        command: String,
    },

    // fleet membership
    AddServer {
        slug: String,
        name: String,
        template: String,
        jarfile: String,
    },
    RemoveServer(String),
    ActivateServer(String),
    DeactivateServer(String),
    BackupServer(String),
    ReloadNetwork,
}
