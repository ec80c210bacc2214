use grow_core::IceCandidateInit;

use crate::media::RemoteTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events the peer connection raises for the room session loop.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A local ICE candidate was gathered and must reach the other peer.
    LocalCandidate(IceCandidateInit),

    /// The other peer's media arrived.
    RemoteTrack(RemoteTrack),

    StateChanged(PeerState),
}
