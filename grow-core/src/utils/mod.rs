pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_STUN_ADDR_2: &str = "stun:stun1.l.google.com:19302";

pub const DEFAULT_TOPIC_PREFIX: &str = "/topic/room/";
pub const DEFAULT_APP_PREFIX: &str = "/app/signal/";
