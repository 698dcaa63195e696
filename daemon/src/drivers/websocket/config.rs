use serde::{Deserialize, Serialize};

use crate::drivers::ListenConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsDriverConfig {
    pub listen: ListenConfig,
}
