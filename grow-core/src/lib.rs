pub mod model;
pub mod stomp;
pub mod utils;

pub use model::{
    Destinations, IceCandidateInit, IceServerConfig, ParticipantId, RoomId, SdpType,
    SessionDescription, SignalingEnvelope, SignalingMessage,
};
