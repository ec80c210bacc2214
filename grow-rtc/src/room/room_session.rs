use std::ops::ControlFlow;
use std::sync::Arc;

use grow_core::{ParticipantId, RoomId, SignalingMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{MediaConstraints, SessionConfig};
use crate::error::{NegotiationError, SessionError};
use crate::media::{LoggingSink, MediaCapture, MediaPipeline, MediaSink, SampleTrackCapture};
use crate::negotiation::{NegotiationState, Negotiator, Outcome, PeerConnectionFactory};
use crate::room::room_command::RoomCommand;
use crate::room::room_handle::{RoomHandle, SessionStatus};
use crate::signaling::{ChannelEvent, ChannelState, SignalingChannel, StompSignalingChannel};
use crate::transport::{ConnectionEvent, PeerState, WebRtcConnector};

/// Everything a session needs besides the signaling channel.
pub struct SessionDeps {
    pub connector: Arc<dyn PeerConnectionFactory>,
    pub capture: Arc<dyn MediaCapture>,
    pub sink: Arc<dyn MediaSink>,
}

impl SessionDeps {
    /// webrtc-rs connections, sample tracks and a logging sink.
    pub fn webrtc(config: &SessionConfig) -> Self {
        Self {
            connector: Arc::new(WebRtcConnector::new(config.ice_servers.clone())),
            capture: Arc::new(SampleTrackCapture::default()),
            sink: Arc::new(LoggingSink::new("room")),
        }
    }
}

/// Event loop of one room: consumes channel events, connection events and
/// the leave command one at a time, in arrival order.
pub struct RoomSession {
    room_id: RoomId,
    constraints: MediaConstraints,
    channel: Arc<dyn SignalingChannel>,
    connector: Arc<dyn PeerConnectionFactory>,
    media: MediaPipeline,
    negotiator: Negotiator,
    command_rx: mpsc::Receiver<RoomCommand>,
    channel_rx: mpsc::Receiver<ChannelEvent>,
    channel_state: watch::Receiver<ChannelState>,
    channel_state_open: bool,
    connection_rx: mpsc::Receiver<ConnectionEvent>,
    connection_tx: mpsc::Sender<ConnectionEvent>,
    status_tx: watch::Sender<SessionStatus>,
    peer_state: Option<PeerState>,
    failure: Option<SessionError>,
}

impl RoomSession {
    /// Connects to the configured broker and starts the session loop.
    pub async fn open(
        config: SessionConfig,
        room_id: RoomId,
        deps: SessionDeps,
    ) -> Result<RoomHandle, SessionError> {
        let participant = ParticipantId::new();
        match &config.participant_name {
            Some(name) => info!("Joining room {} as {} ({})", room_id, name, participant),
            None => info!("Joining room {} as {}", room_id, participant),
        }

        let channel = StompSignalingChannel::connect(
            config.broker.clone(),
            &config.destinations,
            room_id.clone(),
            participant,
        );
        Self::with_channel(room_id, config.media, Arc::new(channel), deps).await
    }

    /// Starts the session loop on an existing channel.
    pub async fn with_channel(
        room_id: RoomId,
        constraints: MediaConstraints,
        channel: Arc<dyn SignalingChannel>,
        deps: SessionDeps,
    ) -> Result<RoomHandle, SessionError> {
        let (channel_tx, channel_rx) = mpsc::channel(256);
        channel.subscribe(channel_tx).await?;

        let (command_tx, command_rx) = mpsc::channel(8);
        let (connection_tx, connection_rx) = mpsc::channel(256);
        let channel_state = channel.state();
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            channel: *channel_state.borrow(),
            ..Default::default()
        });

        let session = Self {
            room_id: room_id.clone(),
            constraints,
            channel,
            connector: deps.connector,
            media: MediaPipeline::new(deps.capture, deps.sink),
            negotiator: Negotiator::new(),
            command_rx,
            channel_rx,
            channel_state,
            channel_state_open: true,
            connection_rx,
            connection_tx,
            status_tx,
            peer_state: None,
            failure: None,
        };
        let task = tokio::spawn(session.run());

        Ok(RoomHandle::new(room_id, command_tx, status_rx, task))
    }

    async fn run(mut self) -> Result<(), SessionError> {
        info!("Room session {} started", self.room_id);

        loop {
            tokio::select! {
                // Channel events first, so a queued failure is not lost to a
                // leave request.
                biased;

                evt = self.channel_rx.recv() => match evt {
                    Some(e) => {
                        if self.handle_channel_event(e).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        warn!("Signaling channel stopped delivering events");
                        break;
                    }
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(RoomCommand::Leave) => {
                        info!("Leaving room {}", self.room_id);
                        break;
                    }
                    None => {
                        info!("Room handle dropped, leaving room {}", self.room_id);
                        break;
                    }
                },

                evt = self.connection_rx.recv() => {
                    // The sender half lives in `self`, so this never yields `None`.
                    if let Some(e) = evt {
                        self.handle_connection_event(e).await;
                    }
                }

                changed = self.channel_state.changed(), if self.channel_state_open => {
                    if changed.is_err() {
                        self.channel_state_open = false;
                    }
                }
            }
            self.update_status();
        }

        self.shutdown().await;
        info!("Room session {} finished", self.room_id);

        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) -> ControlFlow<()> {
        match event {
            ChannelEvent::Connected => {
                info!("Signaling channel connected");
                if let Some(pending) = self.negotiator.unpublished_local_description() {
                    info!("Sending the {} that could not be published before", pending.kind());
                    self.publish_local_description(pending).await;
                    return ControlFlow::Continue(());
                }
                if self.negotiator.state() != NegotiationState::Idle {
                    debug!("Negotiation already underway, not offering again");
                    return ControlFlow::Continue(());
                }
                self.ensure_connection().await?;
                match self.negotiator.start_offer().await {
                    Ok(Some(offer)) => self.publish_local_description(offer).await,
                    Ok(None) => {}
                    Err(NegotiationError::NoConnection) => {}
                    Err(e) => warn!("Failed to create offer: {}", e),
                }
            }

            ChannelEvent::Message(message) => {
                if matches!(message, SignalingMessage::Offer { .. }) {
                    self.ensure_connection().await?;
                }
                let kind = message.kind();
                match self.negotiator.handle(message).await {
                    Ok(Outcome::Reply(reply)) => self.publish_local_description(reply).await,
                    Ok(Outcome::Ignored(reason)) => debug!("Ignored {}: {:?}", kind, reason),
                    Ok(Outcome::Applied) | Ok(Outcome::Queued) => {}
                    Err(e) => warn!("Failed to apply {}: {}", kind, e),
                }
            }

            ChannelEvent::Disconnected => {
                info!("Signaling channel disconnected, waiting for reconnect");
            }

            ChannelEvent::GaveUp { attempts } => {
                error!("Unable to join room {}", self.room_id);
                self.failure = Some(SessionError::UnableToJoin { attempts });
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                let Some(message) = self.negotiator.on_local_candidate(candidate) else {
                    return;
                };
                let _ = self.channel.publish(message).await;
            }

            ConnectionEvent::RemoteTrack(track) => {
                info!("Binding remote {} track {}", track.kind, track.id);
                self.media.bind_remote_stream(track);
            }

            ConnectionEvent::StateChanged(state) => {
                info!("Peer connection is now {:?}", state);
                self.peer_state = Some(state);
            }
        }
    }

    /// Acquires media and creates the peer connection unless both exist.
    /// Breaks only when media acquisition fails, which ends the session.
    async fn ensure_connection(&mut self) -> ControlFlow<()> {
        if self.negotiator.has_connection() {
            return ControlFlow::Continue(());
        }

        let tracks = match self.media.acquire_local_media(self.constraints).await {
            Ok(tracks) => tracks,
            Err(e) => {
                error!("Cannot start the session without local media: {}", e);
                self.failure = Some(SessionError::Media(e));
                return ControlFlow::Break(());
            }
        };

        let connection = match self.connector.create(self.connection_tx.clone()).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to create peer connection: {}", e);
                return ControlFlow::Continue(());
            }
        };
        if let Err(e) = connection.add_local_tracks(&tracks).await {
            warn!("Failed to add local tracks: {}", e);
        }
        self.negotiator.attach(connection);
        ControlFlow::Continue(())
    }

    /// Publishes an offer or answer, then the local candidates held back for
    /// it.
    async fn publish_local_description(&mut self, message: SignalingMessage) {
        if self.channel.publish(message).await.is_err() {
            return;
        }
        for candidate in self.negotiator.local_description_sent() {
            let _ = self.channel.publish(candidate).await;
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.negotiator.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        self.media.release();
        if let Err(e) = self.channel.disconnect().await {
            warn!("Failed to disconnect signaling channel: {}", e);
        }

        let error = self.failure.as_ref().map(|e| e.to_string());
        self.status_tx.send_modify(|status| {
            status.channel = ChannelState::Closed;
            status.negotiation = NegotiationState::Closed;
            status.remote_tracks = 0;
            status.error = error;
            status.ended = true;
        });
    }

    fn update_status(&self) {
        let status = SessionStatus {
            channel: *self.channel_state.borrow(),
            negotiation: self.negotiator.state(),
            peer: self.peer_state,
            remote_tracks: self.media.remote_track_count(),
            error: None,
            ended: false,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
