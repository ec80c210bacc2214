mod frame;
mod heartbeat;

pub use frame::{FrameError, HEARTBEAT, StompCommand, StompFrame};
pub use heartbeat::{HeartBeat, MAX_INTERVAL_MS, dead_after};

pub const STOMP_VERSION: &str = "1.2";
