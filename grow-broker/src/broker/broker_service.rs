use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use dashmap::DashMap;
use grow_core::stomp::{StompCommand, StompFrame};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::BrokerConfig;

/// One WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    client: ClientId,
    id: String,
}

struct BrokerInner {
    clients: DashMap<ClientId, mpsc::UnboundedSender<Message>>,
    topics: DashMap<String, Vec<Subscription>>,
    config: BrokerConfig,
    routed: AtomicU64,
}

/// Shared broker state: connected clients and topic subscriptions.
#[derive(Clone)]
pub struct BrokerService {
    inner: Arc<BrokerInner>,
}

impl BrokerService {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                clients: DashMap::new(),
                topics: DashMap::new(),
                config,
                routed: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn add_client(&self, client: ClientId, tx: mpsc::UnboundedSender<Message>) {
        self.inner.clients.insert(client, tx);
    }

    /// Drops the client and every subscription it held.
    pub fn remove_client(&self, client: &ClientId) {
        self.inner.clients.remove(client);
        for mut subs in self.inner.topics.iter_mut() {
            subs.retain(|s| &s.client != client);
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
    }

    /// Registers `id` for `destination`, replacing an earlier subscription
    /// with the same id.
    pub fn subscribe(&self, client: &ClientId, id: &str, destination: &str) {
        self.unsubscribe(client, id);
        debug!("Client {} subscribed to {} as {}", client, destination, id);
        self.inner
            .topics
            .entry(destination.to_owned())
            .or_default()
            .push(Subscription {
                client: client.clone(),
                id: id.to_owned(),
            });
    }

    pub fn unsubscribe(&self, client: &ClientId, id: &str) -> bool {
        let mut removed = false;
        for mut subs in self.inner.topics.iter_mut() {
            let before = subs.len();
            subs.retain(|s| !(&s.client == client && s.id == id));
            removed |= subs.len() != before;
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn send_frame(&self, client: &ClientId, frame: &StompFrame) -> bool {
        let Some(tx) = self.inner.clients.get(client) else {
            warn!("Attempted to send {} to disconnected client {}", frame.command.as_str(), client);
            return false;
        };
        tx.send(to_ws_message(frame)).is_ok()
    }

    /// Delivers a `SEND` frame as `MESSAGE` to every subscriber of the
    /// matching topic, the sender included. An application destination maps
    /// to the topic of the same room. Returns `None` for destinations
    /// outside both prefixes.
    pub fn route(&self, destination: &str, send: &StompFrame) -> Option<usize> {
        let destinations = &self.inner.config.destinations;
        let topic = if destination.starts_with(&destinations.topic_prefix) {
            destination.to_owned()
        } else {
            destinations.topic_for_app(destination)?
        };

        let subscribers = self
            .inner
            .topics
            .get(&topic)
            .map(|subs| subs.value().clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for sub in &subscribers {
            let mut message = StompFrame::new(StompCommand::Message)
                .header("destination", topic.as_str())
                .header("subscription", sub.id.as_str())
                .header("message-id", uuid::Uuid::new_v4().to_string());
            if let Some(content_type) = send.get_header("content-type") {
                message = message.header("content-type", content_type);
            }
            let message = message.body(send.body.clone());
            if self.send_frame(&sub.client, &message) {
                delivered += 1;
            }
        }

        self.inner.routed.fetch_add(1, Ordering::Relaxed);
        debug!("Routed {} to {} subscriber(s) of {}", destination, delivered, topic);
        Some(delivered)
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |subs| subs.len())
    }

    pub fn routed_messages(&self) -> u64 {
        self.inner.routed.load(Ordering::Relaxed)
    }
}

/// Text message when the frame is valid UTF-8, binary otherwise.
pub(crate) fn to_ws_message(frame: &StompFrame) -> Message {
    match frame.to_text() {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame.encode()),
    }
}
