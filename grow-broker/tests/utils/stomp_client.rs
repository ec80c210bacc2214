use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use grow_broker::{BrokerConfig, BrokerServer, BrokerService};
use grow_core::stomp::{StompCommand, StompFrame};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub const TIMEOUT_MS: u64 = 2000;

/// Starts a broker on an ephemeral port and returns its WebSocket URL.
pub async fn start_broker(config: BrokerConfig) -> Result<(String, BrokerService)> {
    let server = BrokerServer::new(BrokerConfig {
        listen: "127.0.0.1:0".to_owned(),
        ..config
    });
    let service = server.service().clone();
    let path = service.config().path.clone();
    let (addr, _task) = server.spawn().await?;
    Ok((format!("ws://{}{}", addr, path), service))
}

/// Minimal STOMP client speaking raw frames.
pub struct StompClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StompClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .context("Failed to open WebSocket")?;
        Ok(Self { ws })
    }

    /// Opens the socket and completes CONNECT / CONNECTED.
    pub async fn handshake(url: &str, heart_beat: &str) -> Result<(Self, StompFrame)> {
        let mut client = Self::connect(url).await?;
        client
            .send(
                &StompFrame::new(StompCommand::Connect)
                    .header("accept-version", "1.2")
                    .header("host", "localhost")
                    .header("heart-beat", heart_beat),
            )
            .await?;
        let connected = client.recv().await?;
        if connected.command != StompCommand::Connected {
            bail!("Expected CONNECTED, got {}", connected.command);
        }
        Ok((client, connected))
    }

    pub async fn send(&mut self, frame: &StompFrame) -> Result<()> {
        self.ws.send(Message::text(frame.to_text()?)).await?;
        Ok(())
    }

    /// Sends text that need not be a valid frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::text(text.to_owned())).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, id: &str, destination: &str) -> Result<()> {
        self.send(
            &StompFrame::new(StompCommand::Subscribe)
                .header("id", id)
                .header("destination", destination),
        )
        .await
    }

    pub async fn send_to(&mut self, destination: &str, body: &str) -> Result<()> {
        self.send(
            &StompFrame::new(StompCommand::Send)
                .header("destination", destination)
                .header("content-type", "application/json")
                .body(body.to_owned()),
        )
        .await
    }

    /// Next raw WebSocket message, or `None` once the socket is closed.
    pub async fn next_raw(&mut self) -> Result<Option<Message>> {
        let next = tokio::time::timeout(Duration::from_millis(TIMEOUT_MS), self.ws.next())
            .await
            .context("Timed out waiting for the broker")?;
        match next {
            Some(Ok(Message::Close(_))) | None => Ok(None),
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Next frame, skipping heart-beats.
    pub async fn recv(&mut self) -> Result<StompFrame> {
        loop {
            let Some(msg) = self.next_raw().await? else {
                bail!("Connection closed");
            };
            let data = match msg {
                Message::Text(_) | Message::Binary(_) => msg.into_data(),
                _ => continue,
            };
            if let Some(frame) = StompFrame::decode(&data)? {
                return Ok(frame);
            }
        }
    }

    /// Reads until the broker closes the socket. Returns the frames seen on
    /// the way.
    pub async fn until_closed(&mut self) -> Result<Vec<StompFrame>> {
        let mut frames = Vec::new();
        while let Some(msg) = self.next_raw().await? {
            let data = match msg {
                Message::Text(_) | Message::Binary(_) => msg.into_data(),
                _ => continue,
            };
            if let Some(frame) = StompFrame::decode(&data)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// True when nothing but heart-beats arrives for `ms`.
    pub async fn is_quiet(&mut self, ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return true,
                Ok(Some(Ok(Message::Text(text)))) if text.as_str().trim().is_empty() => continue,
                Ok(_) => return false,
            }
        }
    }
}
