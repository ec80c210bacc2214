use grow_core::RoomId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::negotiation::NegotiationState;
use crate::room::room_command::RoomCommand;
use crate::signaling::ChannelState;
use crate::transport::PeerState;

/// Snapshot of a running room session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub channel: ChannelState,
    pub negotiation: NegotiationState,
    /// Last state reported by the peer connection, if one exists.
    pub peer: Option<PeerState>,
    pub remote_tracks: usize,
    /// Message of the error that ended the session.
    pub error: Option<String>,
    pub ended: bool,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            channel: ChannelState::Connecting,
            negotiation: NegotiationState::Idle,
            peer: None,
            remote_tracks: 0,
            error: None,
            ended: false,
        }
    }
}

/// Owner side of a room session started by
/// [`RoomSession::open`](crate::room::RoomSession::open).
pub struct RoomHandle {
    room_id: RoomId,
    commands: mpsc::Sender<RoomCommand>,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl RoomHandle {
    pub(crate) fn new(
        room_id: RoomId,
        commands: mpsc::Sender<RoomCommand>,
        status: watch::Receiver<SessionStatus>,
        task: JoinHandle<Result<(), SessionError>>,
    ) -> Self {
        Self {
            room_id,
            commands,
            status,
            task,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Resolves once the session stopped on its own (media failure, channel
    /// gave up) or after [`RoomHandle::leave`].
    pub async fn ended(&mut self) {
        let _ = self.status.wait_for(|s| s.ended).await;
    }

    /// Leaves the room and returns how the session ended.
    pub async fn leave(self) -> Result<(), SessionError> {
        // The loop may already be gone; its result is still in the task.
        let _ = self.commands.send(RoomCommand::Leave).await;
        self.task
            .await
            .map_err(|e| SessionError::Join(e.to_string()))?
    }
}
