use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Input;
use grow::RoomId;
use grow::broker::{BrokerConfig, BrokerServer};
use grow::client::{RoomSession, SessionConfig, SessionDeps, SessionError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grow")]
#[command(about = "Two-party WebRTC room sessions over a STOMP broker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room and negotiate media with the other participant.
    Join {
        /// Room to join. Prompted for when omitted.
        room: Option<String>,

        /// JSON session config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Broker WebSocket URL, overrides the config file.
        #[arg(long)]
        broker: Option<String>,

        /// Display name, only used in logs.
        #[arg(long)]
        name: Option<String>,

        /// Stop after this many failed connection attempts.
        #[arg(long)]
        max_attempts: Option<u32>,

        #[arg(long)]
        no_audio: bool,

        #[arg(long)]
        no_video: bool,
    },

    /// Run the development broker.
    Broker {
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: String,

        #[arg(long, default_value_t = 10_000)]
        heartbeat_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Join {
            room,
            config,
            broker,
            name,
            max_attempts,
            no_audio,
            no_video,
        } => {
            let mut session_config = SessionConfig::load(config.as_deref())
                .context("Failed to load session config")?;
            if let Some(url) = broker {
                session_config.broker.url = url;
            }
            if name.is_some() {
                session_config.participant_name = name;
            }
            if max_attempts.is_some() {
                session_config.broker.max_reconnect_attempts = max_attempts;
            }
            session_config.media.audio &= !no_audio;
            session_config.media.video &= !no_video;

            join(session_config, room).await
        }
        Commands::Broker {
            listen,
            heartbeat_ms,
        } => {
            println!("{}", format!("Starting broker on {}", listen).green().bold());
            let config = BrokerConfig {
                listen,
                heartbeat_ms,
                ..Default::default()
            };
            BrokerServer::new(config).run().await
        }
    }
}

async fn join(config: SessionConfig, room: Option<String>) -> Result<()> {
    let room = match room {
        Some(room) => room,
        None => Input::<String>::new()
            .with_prompt("Room")
            .interact_text()
            .context("Failed to read room id")?,
    };
    let room_id = RoomId::new(room).context("Room id must not be empty")?;

    println!(
        "{}",
        format!("Joining room {} via {}", room_id, config.broker.url).cyan()
    );

    let deps = SessionDeps::webrtc(&config);
    let mut handle = RoomSession::open(config, room_id, deps)
        .await
        .context("Failed to open room session")?;

    let mut status = handle.status();
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Leaving room...".yellow());
                break handle.leave().await;
            }
            _ = handle.ended() => {
                break handle.leave().await;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break handle.leave().await;
                }
                let s = status.borrow_and_update().clone();
                println!(
                    "{} channel={} negotiation={} peer={} remote_tracks={}",
                    "status".dimmed(),
                    s.channel,
                    s.negotiation,
                    s.peer.map_or("-".to_owned(), |p| format!("{:?}", p)),
                    s.remote_tracks
                );
            }
        }
    };

    match result {
        Ok(()) => {
            println!("{}", "Left the room.".green().bold());
            Ok(())
        }
        Err(SessionError::Media(e)) => {
            println!("{}", format!("Cannot access camera or microphone: {}", e).red());
            Err(e.into())
        }
        Err(e) => {
            println!("{}", format!("Session failed: {}", e).red());
            Err(e.into())
        }
    }
}
