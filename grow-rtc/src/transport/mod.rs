pub mod connection_wrapper;
pub mod transport_event;

pub use connection_wrapper::{WebRtcConnector, WebRtcPeerConnection};
pub use transport_event::{ConnectionEvent, PeerState};
