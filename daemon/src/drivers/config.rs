use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use super::websocket::WsDriverConfig;
use super::Drivers;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriversConfig {
    pub enabled: Cow<'static, [Drivers]>,
    pub websocket: WsDriverConfig,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            enabled: Cow::Borrowed(&[Drivers::Websocket]),
            websocket: WsDriverConfig::default(),
        }
    }
}

/// Bind address shared by every network-facing driver config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
        }
    }
}
