use crate::report::{MonitorSample, ServerDetail, ServerSummary};
use crate::state::ServerState;
use serde::{Deserialize, Serialize};

/// Outbound push envelope, mirroring the inbound `{"type", "value"}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushMessage {
    ServersList(Vec<ServerSummary>),
    ServerDetail(ServerDetail),

    // per-server state changes
    ServerRunning {
        slug: String,
        running: ServerState,
    },
    ServerActive {
        slug: String,
        #[serde(rename = "isActive")]
        is_active: bool,
    },
    ServerMonitoring {
        slug: String,
        monitoring: MonitorSample,
    },
    ServerBackup {
        slug: String,
        date: String,
        size: u64,
    },
    ServerPlayerLogin {
        slug: String,
        name: String,
        ip: String,
    },
    ServerPlayerLogout {
        slug: String,
        name: String,
        ip: String,
    },

    // console channel
    ServerConsole {
        slug: String,
        console: Vec<String>,
        length: usize,
    },
    ServerConsoleLine {
        slug: String,
        line: String,
    },

    Error {
        kind: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::LastBackup;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn running_change_wire_shape() {
        let msg = PushMessage::ServerRunning {
            slug: "lobby".to_string(),
            running: ServerState::Starting,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "SERVER_RUNNING",
                "value": {"slug": "lobby", "running": "STARTING"}
            })
        );
    }

    #[test]
    fn console_line_wire_shape() {
        let msg = PushMessage::ServerConsoleLine {
            slug: "lobby".to_string(),
            line: "[12:00:00 INFO]: hello".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "SERVER_CONSOLE_LINE",
                "value": {"slug": "lobby", "line": "[12:00:00 INFO]: hello"}
            })
        );
    }

    #[test]
    fn servers_list_uses_camel_case_fields() {
        let msg = PushMessage::ServersList(vec![ServerSummary {
            slug: "lobby".to_string(),
            name: "Lobby".to_string(),
            port: 25566,
            is_active: true,
            running: ServerState::Stopped,
        }]);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "SERVERS_LIST",
                "value": [{
                    "slug": "lobby",
                    "name": "Lobby",
                    "port": 25566,
                    "isActive": true,
                    "running": "STOPPED"
                }]
            })
        );
    }

    #[test]
    fn backup_event_round_trips() {
        let msg = PushMessage::ServerBackup {
            slug: "lobby".to_string(),
            date: "2019-03-02-04-05-06".to_string(),
            size: 1024,
        };
        let raw = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<PushMessage>(&raw).unwrap(), msg);
    }

    #[test]
    fn detail_snapshot_envelope() {
        let msg = PushMessage::ServerDetail(ServerDetail {
            slug: "lobby".to_string(),
            name: "Lobby".to_string(),
            is_active: false,
            running: ServerState::Started,
            monitoring: Some(MonitorSample(vec!["0.10".to_string()])),
            last_backup: LastBackup::never(),
            players: 2,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], json!("SERVER_DETAIL"));
        assert_eq!(value["value"]["monitoring"], json!(["0.10"]));
        assert_eq!(value["value"]["players"], json!(2));
    }
}
