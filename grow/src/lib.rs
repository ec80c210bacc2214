pub use grow_core::{ParticipantId, RoomId, SignalingMessage};

pub mod model {
    pub use grow_core::model::*;
}

pub mod stomp {
    pub use grow_core::stomp::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use grow_rtc::*;
}

#[cfg(feature = "broker")]
pub mod broker {
    pub use grow_broker::*;
}
