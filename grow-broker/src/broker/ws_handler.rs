use std::ops::ControlFlow;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use grow_core::stomp::{
    HEARTBEAT, HeartBeat, STOMP_VERSION, StompCommand, StompFrame, dead_after,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, info, warn};

use crate::broker::broker_service::{BrokerService, ClientId, to_ws_message};

const IDLE_PERIOD: Duration = Duration::from_secs(3600);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const SERVER_NAME: &str = concat!("grow-broker/", env!("CARGO_PKG_VERSION"));

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<BrokerService>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: BrokerService) {
    let client_id = ClientId::new();
    info!("New WebSocket connection: {}", client_id);

    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (heartbeat_tx, mut heartbeat_rx) = watch::channel::<Option<Duration>>(None);

    service.add_client(client_id.clone(), tx.clone());

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = interval_at(Instant::now() + IDLE_PERIOD, IDLE_PERIOD);
        let mut heartbeat_on = false;
        let mut heartbeat_open = true;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let closing = matches!(msg, Message::Close(_));
                    if sender.send(msg).await.is_err() || closing {
                        break;
                    }
                }

                changed = heartbeat_rx.changed(), if heartbeat_open => {
                    if changed.is_err() {
                        heartbeat_open = false;
                        continue;
                    }
                    if let Some(period) = *heartbeat_rx.borrow() {
                        heartbeat = interval_at(Instant::now() + period, period);
                        heartbeat_on = true;
                    }
                }

                _ = heartbeat.tick(), if heartbeat_on => {
                    if sender.send(Message::Text(HEARTBEAT.to_owned().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let mut session = StompSession {
            client_id: client_id.clone(),
            service: service.clone(),
            outbound: tx,
            heartbeat_tx,
            connected: false,
            expect_every: None,
        };
        async move { session.run(receiver).await }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => {
            // Let queued frames (ERROR, RECEIPT) reach the client.
            service.remove_client(&client_id);
            if timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    };

    service.remove_client(&client_id);
    info!("WebSocket disconnected: {}", client_id);
}

/// STOMP state of one client connection.
struct StompSession {
    client_id: ClientId,
    service: BrokerService,
    outbound: mpsc::UnboundedSender<Message>,
    heartbeat_tx: watch::Sender<Option<Duration>>,
    connected: bool,
    expect_every: Option<Duration>,
}

impl StompSession {
    async fn run(&mut self, mut receiver: SplitStream<WebSocket>) {
        loop {
            let next = match self.expect_every {
                Some(period) => match timeout(dead_after(period), receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "No heart-beat from {} for {:?}",
                            self.client_id,
                            dead_after(period)
                        );
                        self.close();
                        break;
                    }
                },
                None => receiver.next().await,
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    debug!("WebSocket error from {}: {}", self.client_id, e);
                    break;
                }
                None => break,
            };

            let decoded = match &msg {
                Message::Text(text) => StompFrame::decode(text.as_bytes()),
                Message::Binary(data) => StompFrame::decode(data),
                Message::Close(_) => break,
                _ => continue,
            };
            let flow = match decoded {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => continue,
                Err(e) => self.fail(&format!("malformed frame: {}", e)),
            };
            if flow.is_break() {
                break;
            }
        }
    }

    fn handle_frame(&mut self, frame: StompFrame) -> ControlFlow<()> {
        if !self.connected && !matches!(frame.command, StompCommand::Connect | StompCommand::Stomp)
        {
            return self.fail("expected CONNECT");
        }

        match frame.command {
            StompCommand::Connect | StompCommand::Stomp => self.on_connect(&frame)?,

            StompCommand::Subscribe => {
                let (Some(id), Some(destination)) =
                    (frame.get_header("id"), frame.get_header("destination"))
                else {
                    return self.fail("SUBSCRIBE requires id and destination");
                };
                self.service.subscribe(&self.client_id, id, destination);
            }

            StompCommand::Unsubscribe => {
                let Some(id) = frame.get_header("id") else {
                    return self.fail("UNSUBSCRIBE requires id");
                };
                if !self.service.unsubscribe(&self.client_id, id) {
                    debug!("Client {} had no subscription {}", self.client_id, id);
                }
            }

            StompCommand::Send => {
                let Some(destination) = frame.get_header("destination") else {
                    return self.fail("SEND requires destination");
                };
                if self.service.route(destination, &frame).is_none() {
                    return self.fail(&format!("unknown destination {}", destination));
                }
            }

            StompCommand::Disconnect => {
                self.receipt(&frame);
                info!("Client {} disconnected", self.client_id);
                self.close();
                return ControlFlow::Break(());
            }

            StompCommand::Ack
            | StompCommand::Nack
            | StompCommand::Begin
            | StompCommand::Commit
            | StompCommand::Abort => {
                debug!("Ignoring {} from {}", frame.command.as_str(), self.client_id);
            }

            StompCommand::Connected
            | StompCommand::Message
            | StompCommand::Receipt
            | StompCommand::Error => {
                return self.fail(&format!("unexpected {} frame", frame.command.as_str()));
            }
        }

        self.receipt(&frame);
        ControlFlow::Continue(())
    }

    fn on_connect(&mut self, frame: &StompFrame) -> ControlFlow<()> {
        if self.connected {
            return self.fail("already connected");
        }
        if let Some(versions) = frame.get_header("accept-version")
            && !versions.split(',').any(|v| v.trim() == STOMP_VERSION)
        {
            return self.fail(&format!("unsupported version {}", versions));
        }

        let heartbeat_ms = self.service.config().heartbeat_ms;
        let server = HeartBeat::new(heartbeat_ms, heartbeat_ms);
        let client = HeartBeat::parse(frame.get_header("heart-beat"));
        let (send_every, expect_every) = server.negotiate(&client);
        if send_every.is_some() {
            let _ = self.heartbeat_tx.send(send_every);
        }
        self.expect_every = expect_every;
        self.connected = true;

        info!(
            "Client {} connected (sending heart-beats every {:?}, expecting every {:?})",
            self.client_id, send_every, expect_every
        );
        self.send(
            &StompFrame::new(StompCommand::Connected)
                .header("version", STOMP_VERSION)
                .header("heart-beat", server.header_value())
                .header("server", SERVER_NAME),
        );
        ControlFlow::Continue(())
    }

    fn receipt(&self, frame: &StompFrame) {
        if let Some(receipt) = frame.get_header("receipt") {
            self.send(&StompFrame::new(StompCommand::Receipt).header("receipt-id", receipt));
        }
    }

    /// Sends an ERROR frame and closes the connection.
    fn fail(&self, message: &str) -> ControlFlow<()> {
        warn!("Closing {} after protocol error: {}", self.client_id, message);
        self.send(
            &StompFrame::new(StompCommand::Error)
                .header("message", message)
                .header("content-type", "text/plain")
                .body(message.to_owned()),
        );
        self.close();
        ControlFlow::Break(())
    }

    fn send(&self, frame: &StompFrame) {
        let _ = self.outbound.send(to_ws_message(frame));
    }

    fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}
