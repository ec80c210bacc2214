use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use grow_core::{IceCandidateInit, SessionDescription};
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::media::LocalMediaTracks;
use crate::transport::ConnectionEvent;

/// Mirror of the connection's `signalingState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The parts of a WebRTC peer connection the negotiator drives.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_tracks(&self, tracks: &LocalMediaTracks) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription)
    -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Discards a pending local offer and returns to `stable`. Attached
    /// local tracks stay attached.
    async fn rollback(&self) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), NegotiationError>;

    async fn signaling_state(&self) -> SignalingState;

    async fn has_remote_description(&self) -> bool;

    async fn close(&self) -> Result<(), NegotiationError>;

    async fn is_closed(&self) -> bool;
}

/// Creates one connection per room session. Connection callbacks are
/// forwarded to `events`.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
