use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{DEFAULT_APP_PREFIX, DEFAULT_TOPIC_PREFIX};

/// Opaque room identifier handed out by the room allocation service.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Returns `None` for an empty or whitespace-only id.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return None;
        }
        Some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker destination naming. A room owns one broadcast topic that peers
/// subscribe to and one application destination that peers send to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Destinations {
    pub topic_prefix: String,
    pub app_prefix: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_owned(),
            app_prefix: DEFAULT_APP_PREFIX.to_owned(),
        }
    }
}

impl Destinations {
    pub fn topic(&self, room: &RoomId) -> String {
        format!("{}{}", self.topic_prefix, room.as_str())
    }

    pub fn app(&self, room: &RoomId) -> String {
        format!("{}{}", self.app_prefix, room.as_str())
    }

    /// Maps an application destination onto the topic of the same room.
    pub fn topic_for_app(&self, destination: &str) -> Option<String> {
        let room = destination.strip_prefix(&self.app_prefix)?;
        if room.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.topic_prefix, room))
    }
}
