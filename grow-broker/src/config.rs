use grow_core::Destinations;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub listen: String,
    /// WebSocket endpoint path.
    pub path: String,
    pub destinations: Destinations,
    /// Heart-beat interval offered in both directions. 0 disables it.
    pub heartbeat_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            path: "/ws".to_owned(),
            destinations: Destinations::default(),
            heartbeat_ms: 10_000,
        }
    }
}
