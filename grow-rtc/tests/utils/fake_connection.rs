use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grow_core::{IceCandidateInit, SdpType, SessionDescription};
use grow_rtc::NegotiationError;
use grow_rtc::media::{LocalMediaTracks, RemoteTrack};
use grow_rtc::negotiation::{PeerConnection, PeerConnectionFactory, SignalingState};
use grow_rtc::transport::ConnectionEvent;
use tokio::sync::mpsc;

/// Every call the negotiator made on a [`FakePeerConnection`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddTracks(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    Rollback,
    AddCandidate(String),
    Close,
}

struct FakeState {
    signaling: SignalingState,
    remote_set: bool,
    closed: bool,
    offers: usize,
}

/// In-memory peer connection following the browser's signaling state rules.
pub struct FakePeerConnection {
    label: String,
    calls: Mutex<Vec<Call>>,
    state: Mutex<FakeState>,
    events: mpsc::Sender<ConnectionEvent>,
    /// Emitted while `set_local_description` runs, before it returns.
    candidates_on_local: Mutex<Vec<IceCandidateInit>>,
    fail_remote: AtomicBool,
}

impl FakePeerConnection {
    pub fn new(label: &str, events: mpsc::Sender<ConnectionEvent>) -> Self {
        Self {
            label: label.to_owned(),
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(FakeState {
                signaling: SignalingState::Stable,
                remote_set: false,
                closed: false,
                offers: 0,
            }),
            events,
            candidates_on_local: Mutex::new(Vec::new()),
            fail_remote: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn added_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn emit_on_local_description(&self, candidates: Vec<IceCandidateInit>) {
        *self.candidates_on_local.lock().unwrap() = candidates;
    }

    pub fn fail_remote_descriptions(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub async fn emit(&self, event: ConnectionEvent) {
        self.events.send(event).await.unwrap();
    }

    pub async fn emit_remote_track(&self, track: RemoteTrack) {
        self.emit(ConnectionEvent::RemoteTrack(track)).await;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_local_tracks(&self, tracks: &LocalMediaTracks) -> Result<(), NegotiationError> {
        self.record(Call::AddTracks(tracks.len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateOffer);
        let mut state = self.state.lock().unwrap();
        state.offers += 1;
        Ok(SessionDescription::offer(format!(
            "v=0 offer {} #{}",
            self.label, state.offers
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateAnswer);
        let state = self.state.lock().unwrap();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(NegotiationError::Apply(format!(
                "cannot answer in {}",
                state.signaling
            )));
        }
        Ok(SessionDescription::answer(format!("v=0 answer {}", self.label)))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(Call::SetLocal(desc.sdp_type));
        {
            let mut state = self.state.lock().unwrap();
            state.signaling = match desc.sdp_type {
                SdpType::Offer => SignalingState::HaveLocalOffer,
                _ => SignalingState::Stable,
            };
        }

        let candidates = self.candidates_on_local.lock().unwrap().clone();
        for candidate in candidates {
            self.emit(ConnectionEvent::LocalCandidate(candidate)).await;
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(Call::SetRemote(desc.sdp_type));
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::Apply("rejected by fake".to_owned()));
        }

        let mut state = self.state.lock().unwrap();
        match (desc.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable) => {
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                state.signaling = SignalingState::Stable;
            }
            (sdp_type, current) => {
                return Err(NegotiationError::Apply(format!(
                    "cannot apply {:?} in {}",
                    sdp_type, current
                )));
            }
        }
        state.remote_set = true;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        self.record(Call::Rollback);
        let mut state = self.state.lock().unwrap();
        state.signaling = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), NegotiationError> {
        self.record(Call::AddCandidate(candidate.candidate));
        if !self.state.lock().unwrap().remote_set {
            return Err(NegotiationError::Apply(
                "no remote description".to_owned(),
            ));
        }
        Ok(())
    }

    async fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote_set
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.record(Call::Close);
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.signaling = SignalingState::Closed;
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// Hands out [`FakePeerConnection`]s and keeps them for inspection.
#[derive(Clone)]
pub struct FakeConnector {
    label: String,
    created: Arc<Mutex<Vec<Arc<FakePeerConnection>>>>,
    candidates_on_local: Vec<IceCandidateInit>,
    fail: bool,
}

impl FakeConnector {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            created: Arc::new(Mutex::new(Vec::new())),
            candidates_on_local: Vec::new(),
            fail: false,
        }
    }

    pub fn with_candidates(mut self, candidates: &[&str]) -> Self {
        self.candidates_on_local = candidates
            .iter()
            .map(|c| IceCandidateInit::new(*c))
            .collect();
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn created(&self) -> Vec<Arc<FakePeerConnection>> {
        self.created.lock().unwrap().clone()
    }

    pub fn connection(&self) -> Option<Arc<FakePeerConnection>> {
        self.created().into_iter().next()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeConnector {
    async fn create(
        &self,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        if self.fail {
            return Err(NegotiationError::Connection("fake connector".to_owned()));
        }
        let connection = Arc::new(FakePeerConnection::new(&self.label, events));
        connection.emit_on_local_description(self.candidates_on_local.clone());
        self.created.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}
