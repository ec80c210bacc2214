use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::{BrokerService, ws_handler};
use crate::config::BrokerConfig;

/// STOMP-over-WebSocket relay for local development and tests.
pub struct BrokerServer {
    service: BrokerService,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            service: BrokerService::new(config),
        }
    }

    pub fn service(&self) -> &BrokerService {
        &self.service
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(self.service.config().path.as_str(), get(ws_handler))
            .with_state(self.service.clone())
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "Broker listening on ws://{}{}",
                addr,
                self.service.config().path
            );
        }
        axum::serve(listener, self.router()).await
    }

    /// Binds the configured address and serves until the task is dropped.
    pub async fn run(self) -> Result<()> {
        let listen = self.service.config().listen.clone();
        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("Failed to bind {}", listen))?;
        self.serve(listener).await.context("Broker server failed")
    }

    /// Binds the configured address and serves in the background. Useful with
    /// port 0.
    pub async fn spawn(self) -> Result<(SocketAddr, JoinHandle<std::io::Result<()>>)> {
        let listen = self.service.config().listen.clone();
        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("Failed to bind {}", listen))?;
        let addr = listener.local_addr()?;
        Ok((addr, tokio::spawn(self.serve(listener))))
    }
}
