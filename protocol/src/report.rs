use crate::state::ServerState;
use serde::{Deserialize, Serialize};

/// One resource sample captured by the monitoring subprocess; the trimmed
/// columns are kept verbatim in arrival order and forwarded opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorSample(pub Vec<String>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastBackup {
    /// `YYYY-MM-DD-HH-mm-ss`, or `"never"` when no backup exists yet.
    pub date: String,
    pub size: u64,
}

impl LastBackup {
    pub fn never() -> Self {
        LastBackup {
            date: "never".to_string(),
            size: 0,
        }
    }
}

/// Fleet membership entry, one per registered server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub slug: String,
    pub name: String,
    pub port: u16,
    pub is_active: bool,
    pub running: ServerState,
}

/// Point-in-time snapshot of a single server, sent when a detail
/// subscription is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetail {
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    pub running: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitorSample>,
    pub last_backup: LastBackup,
    pub players: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detail_omits_sample_when_stopped() {
        let detail = ServerDetail {
            slug: "lobby".to_string(),
            name: "Lobby".to_string(),
            is_active: true,
            running: ServerState::Stopped,
            monitoring: None,
            last_backup: LastBackup::never(),
            players: 0,
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value.get("monitoring"), None);
        assert_eq!(value["isActive"], serde_json::json!(true));
        assert_eq!(value["lastBackup"]["date"], serde_json::json!("never"));
    }

    #[test]
    fn sample_is_a_bare_array() {
        let sample = MonitorSample(vec!["1.00".to_string(), "2.00".to_string()]);
        assert_eq!(
            serde_json::to_string(&sample).unwrap(),
            r#"["1.00","2.00"]"#
        );
    }
}
