use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use grow_core::{IceCandidateInit, IceServerConfig, SdpType, SessionDescription};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::error::NegotiationError;
use crate::media::{LocalMediaTracks, RemoteTrack, TrackKind};
use crate::negotiation::{PeerConnection, PeerConnectionFactory, SignalingState};
use crate::transport::transport_event::{ConnectionEvent, PeerState};

/// [`PeerConnection`] backed by a webrtc-rs `RTCPeerConnection`.
///
/// webrtc-rs cannot apply a `rollback` description, so [`rollback`] closes
/// the underlying connection and builds a fresh one with the same ICE
/// servers and local tracks. Callbacks of a replaced connection are muted.
///
/// [`rollback`]: PeerConnection::rollback
pub struct WebRtcPeerConnection {
    ice_servers: Vec<IceServerConfig>,
    events: mpsc::Sender<ConnectionEvent>,
    generation: Arc<AtomicU64>,
    local_tracks: Mutex<Option<LocalMediaTracks>>,
    peer_connection: RwLock<Arc<RTCPeerConnection>>,
}

impl WebRtcPeerConnection {
    /// Builds the connection and wires its callbacks into `event_tx`.
    pub async fn new(
        ice_servers: &[IceServerConfig],
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Self, NegotiationError> {
        let generation = Arc::new(AtomicU64::new(0));
        let peer_connection =
            build_peer_connection(ice_servers, event_tx.clone(), generation.clone(), 0).await?;

        Ok(Self {
            ice_servers: ice_servers.to_vec(),
            events: event_tx,
            generation,
            local_tracks: Mutex::new(None),
            peer_connection: RwLock::new(peer_connection),
        })
    }

    /// The webrtc-rs connection currently in use.
    pub async fn inner(&self) -> Arc<RTCPeerConnection> {
        self.peer_connection.read().await.clone()
    }
}

async fn build_peer_connection(
    ice_servers: &[IceServerConfig],
    event_tx: mpsc::Sender<ConnectionEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
    let mut m = MediaEngine::default();
    m.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut m)?;

    let api = APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
            })
            .collect(),
        ..Default::default()
    };

    let peer_connection = Arc::new(
        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| NegotiationError::Connection(e.to_string()))?,
    );

    let state_tx = event_tx.clone();
    let state_gen = current.clone();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let live = state_gen.load(Ordering::SeqCst) == generation;
            Box::pin(async move {
                if !live {
                    return;
                }
                info!("Peer connection state changed: {}", s);
                let Some(state) = peer_state(s) else { return };
                let _ = tx.send(ConnectionEvent::StateChanged(state)).await;
            })
        },
    ));

    let ice_tx = event_tx.clone();
    let ice_gen = current.clone();
    peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
        let tx = ice_tx.clone();
        let live = ice_gen.load(Ordering::SeqCst) == generation;
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = c else { return };
            if !live {
                return;
            }
            let Ok(init) = candidate.to_json() else {
                return;
            };
            let _ = tx
                .send(ConnectionEvent::LocalCandidate(from_rtc_candidate(init)))
                .await;
        })
    }));

    let track_tx = event_tx;
    let track_gen = current;
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = track_tx.clone();
            let live = track_gen.load(Ordering::SeqCst) == generation;
            Box::pin(async move {
                if !live {
                    return;
                }
                let Some(kind) = TrackKind::from_codec_type(track.kind()) else {
                    warn!("Ignoring remote track {} of unknown kind", track.id());
                    return;
                };
                debug!("Remote {} track {} arrived", kind, track.id());
                let remote = RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    source: Some(track),
                };
                let _ = tx.send(ConnectionEvent::RemoteTrack(remote)).await;
            })
        },
    ));

    Ok(peer_connection)
}

async fn attach_tracks(
    peer_connection: &RTCPeerConnection,
    tracks: &LocalMediaTracks,
) -> Result<(), NegotiationError> {
    for track in tracks.iter() {
        let Some(rtc) = track.rtc() else {
            debug!("Local {} track {} has no RTP side", track.kind(), track.id());
            continue;
        };
        let sender = peer_connection.add_track(rtc.clone()).await?;

        // RTCP must be drained for the interceptors to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
    }
    Ok(())
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_local_tracks(&self, tracks: &LocalMediaTracks) -> Result<(), NegotiationError> {
        attach_tracks(&*self.inner().await, tracks).await?;
        let mut attached = self.local_tracks.lock().await;
        match attached.as_mut() {
            Some(existing) => existing.extend(tracks),
            None => *attached = Some(tracks.clone()),
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.inner().await.create_offer(None).await?;
        Ok(from_rtc_description(&offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.inner().await.create_answer(None).await?;
        Ok(from_rtc_description(&answer))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(desc)?;
        self.inner().await.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = to_rtc_description(desc)?;
        self.inner()
            .await
            .set_remote_description(desc)
            .await
            .map_err(|e| NegotiationError::Apply(e.to_string()))
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        let mut current = self.peer_connection.write().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = current.close().await {
            warn!("Failed to close the replaced peer connection: {}", e);
        }

        let fresh = build_peer_connection(
            &self.ice_servers,
            self.events.clone(),
            self.generation.clone(),
            generation,
        )
        .await?;
        if let Some(tracks) = self.local_tracks.lock().await.as_ref() {
            attach_tracks(&fresh, tracks).await?;
        }
        *current = fresh;
        info!("Local offer discarded on a fresh peer connection");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), NegotiationError> {
        self.inner()
            .await
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| NegotiationError::Apply(e.to_string()))
    }

    async fn signaling_state(&self) -> SignalingState {
        match self.inner().await.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn has_remote_description(&self) -> bool {
        self.inner().await.remote_description().await.is_some()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.inner().await.close().await?;
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.inner().await.connection_state() == RTCPeerConnectionState::Closed
    }
}

/// Creates [`WebRtcPeerConnection`]s with a fixed ICE server list.
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcConnector {
    async fn create(
        &self,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let connection = WebRtcPeerConnection::new(&self.ice_servers, events).await?;
        Ok(Arc::new(connection))
    }
}

fn peer_state(s: RTCPeerConnectionState) -> Option<PeerState> {
    match s {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

fn from_rtc_description(desc: &RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(NegotiationError::Apply(
                "rollback is done by replacing the connection".to_owned(),
            ));
        }
    };
    parsed.map_err(|e| NegotiationError::Apply(e.to_string()))
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidateInit {
    IceCandidateInit {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_candidate(candidate: IceCandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}
