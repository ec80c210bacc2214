mod negotiator;
mod peer_connection;

pub use negotiator::{IgnoreReason, NegotiationState, Negotiator, Outcome};
pub use peer_connection::{PeerConnection, PeerConnectionFactory, SignalingState};
