pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod room;
pub mod signaling;
pub mod transport;

pub use config::{BrokerSettings, ConfigError, MediaConstraints, SessionConfig};
pub use error::{MediaAcquisitionError, NegotiationError, SessionError, SignalingError};
pub use negotiation::{NegotiationState, Negotiator, Outcome};
pub use room::{RoomHandle, RoomSession, SessionDeps, SessionStatus};
pub use signaling::{ChannelEvent, ChannelState, SignalingChannel, StompSignalingChannel};
