mod signaling_channel;
mod stomp_channel;

pub use signaling_channel::{ChannelEvent, ChannelState, ChannelStats, SignalingChannel};
pub use stomp_channel::StompSignalingChannel;
