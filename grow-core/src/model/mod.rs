mod participant;
mod room;
mod signaling;

pub use participant::ParticipantId;
pub use room::{Destinations, RoomId};
pub use signaling::{
    IceCandidateInit, IceServerConfig, SdpType, SessionDescription, SignalingEnvelope,
    SignalingMessage,
};
