use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use grow_core::stomp::{
    HEARTBEAT, HeartBeat, STOMP_VERSION, StompCommand, StompFrame, dead_after,
};
use grow_core::{Destinations, ParticipantId, RoomId, SignalingEnvelope, SignalingMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::config::BrokerSettings;
use crate::error::SignalingError;
use crate::signaling::signaling_channel::{
    ChannelEvent, ChannelState, ChannelStats, SignalingChannel,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SUBSCRIPTION_ID: &str = "sub-0";
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

enum ChannelCommand {
    Subscribe(mpsc::Sender<ChannelEvent>),
    Publish {
        body: String,
        reply: oneshot::Sender<Result<(), SignalingError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// [`SignalingChannel`] over STOMP 1.2 on a WebSocket. One background task
/// owns the socket and reconnects after `reconnect_delay` whenever the
/// connection fails or goes silent.
pub struct StompSignalingChannel {
    room_id: RoomId,
    participant: ParticipantId,
    commands: mpsc::Sender<ChannelCommand>,
    state: watch::Receiver<ChannelState>,
    stats: Arc<ChannelStats>,
}

impl StompSignalingChannel {
    /// Spawns the transport task for `room_id`. Connection failures are
    /// retried in the background and never returned here.
    pub fn connect(
        settings: BrokerSettings,
        destinations: &Destinations,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let stats = Arc::new(ChannelStats::default());

        info!(
            "Opening signaling channel for room {} at {}",
            room_id, settings.url
        );

        let task = ChannelTask {
            settings,
            topic: destinations.topic(&room_id),
            app_destination: destinations.app(&room_id),
            participant: participant.clone(),
            commands: command_rx,
            handler: None,
            state_tx,
            stats: stats.clone(),
        };
        tokio::spawn(task.run());

        Self {
            room_id,
            participant,
            commands: command_tx,
            state: state_rx,
            stats,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.stats
    }

    fn publish_failed(&self, kind: &str, error: &SignalingError) {
        self.stats.record_failed_publish();
        warn!("Failed to publish {} message: {}", kind, error);
    }
}

#[async_trait]
impl SignalingChannel for StompSignalingChannel {
    async fn subscribe(&self, handler: mpsc::Sender<ChannelEvent>) -> Result<(), SignalingError> {
        self.commands
            .send(ChannelCommand::Subscribe(handler))
            .await
            .map_err(|_| SignalingError::Closed)
    }

    async fn publish(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let kind = message.kind();
        if *self.state.borrow() != ChannelState::Connected {
            let err = SignalingError::NotConnected;
            self.publish_failed(kind, &err);
            return Err(err);
        }

        let body = SignalingEnvelope::new(message, Some(self.participant.clone())).encode()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .commands
            .send(ChannelCommand::Publish {
                body,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            let err = SignalingError::Closed;
            self.publish_failed(kind, &err);
            return Err(err);
        }

        let result = reply_rx.await.unwrap_or(Err(SignalingError::Closed));
        match &result {
            Ok(()) => debug!("Published {} message", kind),
            Err(e) => warn!("Failed to publish {} message: {}", kind, e),
        }
        result
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(ChannelCommand::Disconnect { reply: reply_tx })
            .await
            .is_err()
        {
            // Task already finished.
            return Ok(());
        }
        let _ = reply_rx.await;
        Ok(())
    }

    fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }
}

struct BrokerSession {
    sink: WsSink,
    source: WsSource,
    send_every: Option<Duration>,
    expect_every: Option<Duration>,
}

enum SessionEnd {
    Lost,
    Closed(Option<oneshot::Sender<()>>),
}

type Offline = ControlFlow<Option<oneshot::Sender<()>>>;

struct ChannelTask {
    settings: BrokerSettings,
    topic: String,
    app_destination: String,
    participant: ParticipantId,
    commands: mpsc::Receiver<ChannelCommand>,
    handler: Option<mpsc::Sender<ChannelEvent>>,
    state_tx: watch::Sender<ChannelState>,
    stats: Arc<ChannelStats>,
}

impl ChannelTask {
    async fn run(mut self) {
        let mut failed_attempts: u32 = 0;

        loop {
            self.set_state(ChannelState::Connecting);

            let connecting = open_broker_session(self.settings.clone());
            tokio::pin!(connecting);
            let attempt = loop {
                tokio::select! {
                    res = &mut connecting => break Ok(res),
                    cmd = self.commands.recv() => {
                        if let ControlFlow::Break(reply) = self.handle_offline(cmd) {
                            break Err(reply);
                        }
                    }
                }
            };

            let session = match attempt {
                Err(reply) => return self.finish(reply),
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    failed_attempts += 1;
                    warn!(
                        "Broker connection attempt {} failed: {}",
                        failed_attempts, e
                    );
                    if let Some(max) = self.settings.max_reconnect_attempts
                        && failed_attempts >= max
                    {
                        error!("Giving up after {} connection attempts", failed_attempts);
                        self.emit(ChannelEvent::GaveUp {
                            attempts: failed_attempts,
                        })
                        .await;
                        return self.finish(None);
                    }
                    self.set_state(ChannelState::Disconnected);
                    if let ControlFlow::Break(reply) = self.backoff().await {
                        return self.finish(reply);
                    }
                    continue;
                }
            };

            failed_attempts = 0;
            self.stats.record_connect();
            match self.serve(session).await {
                SessionEnd::Closed(reply) => return self.finish(reply),
                SessionEnd::Lost => {
                    self.set_state(ChannelState::Disconnected);
                    self.emit(ChannelEvent::Disconnected).await;
                    if let ControlFlow::Break(reply) = self.backoff().await {
                        return self.finish(reply);
                    }
                }
            }
        }
    }

    async fn serve(&mut self, session: BrokerSession) -> SessionEnd {
        let BrokerSession {
            mut sink,
            mut source,
            send_every,
            expect_every,
        } = session;

        let mut subscribed = false;
        if self.handler.is_some() {
            if let Err(e) = self.send_subscribe(&mut sink).await {
                warn!("Failed to subscribe to {}: {}", self.topic, e);
                return SessionEnd::Lost;
            }
            subscribed = true;
        }
        self.set_state(ChannelState::Connected);
        info!("Connected to broker, topic {}", self.topic);
        if subscribed {
            self.emit(ChannelEvent::Connected).await;
        }

        let send_period = send_every.unwrap_or(IDLE_PERIOD);
        let mut heartbeat = interval_at(Instant::now() + send_period, send_period);
        let check_period = expect_every.unwrap_or(IDLE_PERIOD);
        let mut watchdog = interval_at(Instant::now() + check_period, check_period);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(ChannelCommand::Subscribe(handler)) => {
                        self.handler = Some(handler);
                        if !subscribed {
                            if let Err(e) = self.send_subscribe(&mut sink).await {
                                warn!("Failed to subscribe to {}: {}", self.topic, e);
                                return SessionEnd::Lost;
                            }
                            subscribed = true;
                        }
                        self.emit(ChannelEvent::Connected).await;
                    }
                    Some(ChannelCommand::Publish { body, reply }) => {
                        let frame = StompFrame::new(StompCommand::Send)
                            .header("destination", self.app_destination.as_str())
                            .header("content-type", "application/json")
                            .body(body);
                        let result = send_frame(&mut sink, &frame).await;
                        let lost = result.is_err();
                        if lost {
                            self.stats.record_failed_publish();
                        }
                        let _ = reply.send(result);
                        if lost {
                            return SessionEnd::Lost;
                        }
                    }
                    Some(ChannelCommand::Disconnect { reply }) => {
                        close_session(&mut sink).await;
                        return SessionEnd::Closed(Some(reply));
                    }
                    None => {
                        close_session(&mut sink).await;
                        return SessionEnd::Closed(None);
                    }
                },

                msg = source.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Broker closed the connection");
                            return SessionEnd::Lost;
                        }
                        Some(Err(e)) => {
                            warn!("Broker connection error: {}", e);
                            return SessionEnd::Lost;
                        }
                        Some(Ok(msg)) => {
                            if self.on_ws_message(msg).await.is_break() {
                                return SessionEnd::Lost;
                            }
                        }
                    }
                }

                _ = heartbeat.tick(), if send_every.is_some() => {
                    if let Err(e) = sink.send(Message::text(HEARTBEAT.to_owned())).await {
                        warn!("Failed to send heartbeat: {}", e);
                        return SessionEnd::Lost;
                    }
                }

                _ = watchdog.tick(), if expect_every.is_some() => {
                    if last_seen.elapsed() > dead_after(check_period) {
                        warn!("No data from broker for {:?}, reconnecting", last_seen.elapsed());
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    async fn on_ws_message(&mut self, msg: Message) -> ControlFlow<()> {
        let decoded = match &msg {
            Message::Text(text) => StompFrame::decode(text.as_bytes()),
            Message::Binary(data) => StompFrame::decode(data),
            _ => return ControlFlow::Continue(()),
        };
        let frame = match decoded {
            Ok(Some(frame)) => frame,
            Ok(None) => return ControlFlow::Continue(()),
            Err(e) => {
                self.stats.record_malformed();
                warn!("Dropping undecodable frame: {}", e);
                return ControlFlow::Continue(());
            }
        };

        match frame.command {
            StompCommand::Message => self.on_message(&frame).await,
            StompCommand::Receipt => {
                debug!("Receipt {}", frame.get_header("receipt-id").unwrap_or("?"));
            }
            StompCommand::Error => {
                warn!(
                    "Broker error: {}",
                    frame.get_header("message").unwrap_or("no message")
                );
                return ControlFlow::Break(());
            }
            other => debug!("Ignoring {} frame", other.as_str()),
        }
        ControlFlow::Continue(())
    }

    async fn on_message(&mut self, frame: &StompFrame) {
        let envelope = match frame.body_str() {
            Ok(body) => SignalingEnvelope::decode(body).map_err(SignalingError::from),
            Err(e) => Err(SignalingError::from(e)),
        };
        match envelope {
            Err(e) => {
                self.stats.record_malformed();
                warn!("Dropping malformed signaling payload: {}", e);
            }
            Ok(envelope) if envelope.is_from(&self.participant) => {
                debug!("Dropping own {} message", envelope.message.kind());
            }
            Ok(envelope) => self.emit(ChannelEvent::Message(envelope.message)).await,
        }
    }

    async fn send_subscribe(&self, sink: &mut WsSink) -> Result<(), SignalingError> {
        let frame = StompFrame::new(StompCommand::Subscribe)
            .header("id", SUBSCRIPTION_ID)
            .header("destination", self.topic.as_str())
            .header("ack", "auto");
        send_frame(sink, &frame).await
    }

    /// Handles a command while no broker session is up.
    fn handle_offline(&mut self, cmd: Option<ChannelCommand>) -> Offline {
        match cmd {
            Some(ChannelCommand::Subscribe(handler)) => {
                self.handler = Some(handler);
                ControlFlow::Continue(())
            }
            Some(ChannelCommand::Publish { reply, .. }) => {
                self.stats.record_failed_publish();
                let _ = reply.send(Err(SignalingError::NotConnected));
                ControlFlow::Continue(())
            }
            Some(ChannelCommand::Disconnect { reply }) => ControlFlow::Break(Some(reply)),
            None => ControlFlow::Break(None),
        }
    }

    async fn backoff(&mut self) -> Offline {
        let delay = self.settings.reconnect_delay();
        debug!("Reconnecting in {:?}", delay);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return ControlFlow::Continue(()),
                cmd = self.commands.recv() => {
                    if let ControlFlow::Break(reply) = self.handle_offline(cmd) {
                        return ControlFlow::Break(reply);
                    }
                }
            }
        }
    }

    async fn emit(&mut self, event: ChannelEvent) {
        let Some(handler) = &self.handler else {
            return;
        };
        if handler.send(event).await.is_err() {
            debug!("Channel subscriber dropped");
            self.handler = None;
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn finish(&self, reply: Option<oneshot::Sender<()>>) {
        self.set_state(ChannelState::Closed);
        info!("Signaling channel for {} closed", self.topic);
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }
}

async fn open_broker_session(settings: BrokerSettings) -> Result<BrokerSession, SignalingError> {
    tokio::time::timeout(settings.connect_timeout(), handshake(&settings))
        .await
        .map_err(|_| SignalingError::Timeout)?
}

async fn handshake(settings: &BrokerSettings) -> Result<BrokerSession, SignalingError> {
    let (ws_stream, _) = connect_async(settings.url.as_str()).await?;
    let (mut sink, mut source) = ws_stream.split();

    let heartbeat = settings.heartbeat();
    let connect = StompFrame::new(StompCommand::Connect)
        .header("accept-version", STOMP_VERSION)
        .header("host", host_of(&settings.url))
        .header("heart-beat", heartbeat.header_value());
    send_frame(&mut sink, &connect).await?;

    while let Some(msg) = source.next().await {
        let frame = match msg? {
            Message::Text(text) => StompFrame::decode(text.as_bytes())?,
            Message::Binary(data) => StompFrame::decode(&data)?,
            Message::Close(_) => break,
            _ => continue,
        };
        let Some(frame) = frame else { continue };

        match frame.command {
            StompCommand::Connected => {
                let server = HeartBeat::parse(frame.get_header("heart-beat"));
                let (send_every, expect_every) = heartbeat.negotiate(&server);
                debug!(
                    "Broker heart-beat {:?}, sending every {:?}, expecting every {:?}",
                    server, send_every, expect_every
                );
                return Ok(BrokerSession {
                    sink,
                    source,
                    send_every,
                    expect_every,
                });
            }
            StompCommand::Error => {
                let message = frame
                    .get_header("message")
                    .map(str::to_owned)
                    .unwrap_or_else(|| frame.body_str().unwrap_or_default().to_owned());
                return Err(SignalingError::Handshake(message));
            }
            other => {
                return Err(SignalingError::Handshake(format!(
                    "unexpected {} frame",
                    other.as_str()
                )));
            }
        }
    }

    Err(SignalingError::Handshake(
        "connection closed before CONNECTED".to_owned(),
    ))
}

async fn send_frame(sink: &mut WsSink, frame: &StompFrame) -> Result<(), SignalingError> {
    sink.send(Message::text(frame.to_text()?)).await?;
    Ok(())
}

async fn close_session(sink: &mut WsSink) {
    let disconnect = StompFrame::new(StompCommand::Disconnect);
    if let Err(e) = send_frame(sink, &disconnect).await {
        debug!("Failed to send DISCONNECT: {}", e);
    }
    let _ = sink.close().await;
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', ':']).next().unwrap_or(rest)
}
