use grow_core::stomp::FrameError;

use crate::media::TrackKind;

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Broker handshake failed: {0}")]
    Handshake(String),
    #[error("Timed out waiting for the broker")]
    Timeout,
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Malformed signaling payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Signaling channel is not connected")]
    NotConnected,
    #[error("Signaling channel is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("Peer connection error: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("Description or candidate rejected: {0}")]
    Apply(String),
    #[error("Failed to create peer connection: {0}")]
    Connection(String),
    #[error("No peer connection")]
    NoConnection,
}

/// Only error kind that reaches the user: the session cannot start without
/// local media.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MediaAcquisitionError {
    #[error("Permission to capture media was denied: {0}")]
    PermissionDenied(String),
    #[error("No {0} capture device found")]
    DeviceNotFound(TrackKind),
    #[error("Media constraints cannot be satisfied: {0}")]
    Constraints(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaAcquisitionError),
    #[error("Unable to join room after {attempts} connection attempts")]
    UnableToJoin { attempts: u32 },
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("Session task failed: {0}")]
    Join(String),
}
