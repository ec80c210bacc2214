use std::fmt;
use std::sync::Arc;

use grow_core::{IceCandidateInit, SessionDescription, SignalingMessage};
use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::negotiation::peer_connection::{PeerConnection, SignalingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No local offer yet.
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::HaveLocalOffer => "have-local-offer",
            NegotiationState::HaveRemoteOffer => "have-remote-offer",
            NegotiationState::Stable => "stable",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// An answer was already applied for the current offer.
    DuplicateAnswer,
    /// The offer was already answered.
    DuplicateOffer,
    /// Answer without a pending local offer.
    UnexpectedAnswer,
    NoConnection,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    /// Remote candidate held back until a remote description is set.
    Queued,
    Reply(SignalingMessage),
    Ignored(IgnoreReason),
}

/// Offer/answer/candidate state machine for one peer connection. The only
/// place that changes [`NegotiationState`].
///
/// When both peers offer at once, the peer whose offer sorts first is the
/// polite one: it rolls back and answers. The other peer keeps its offer and
/// sends it again, so exactly one offer wins.
pub struct Negotiator {
    connection: Option<Arc<dyn PeerConnection>>,
    state: NegotiationState,
    remote_description_set: bool,
    pending_remote: Vec<IceCandidateInit>,
    local_description: Option<SignalingMessage>,
    local_description_sent: bool,
    pending_local: Vec<IceCandidateInit>,
    answered_offer: Option<String>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    pub fn new() -> Self {
        Self {
            connection: None,
            state: NegotiationState::Idle,
            remote_description_set: false,
            pending_remote: Vec::new(),
            local_description: None,
            local_description_sent: false,
            pending_local: Vec::new(),
            answered_offer: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Arc<dyn PeerConnection>> {
        self.connection.as_ref()
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    pub fn attach(&mut self, connection: Arc<dyn PeerConnection>) {
        if self.connection.is_some() {
            warn!("Replacing an existing peer connection");
        }
        self.connection = Some(connection);
    }

    /// idle -> have-local-offer. Returns `None` when a round is already
    /// underway, so at most one offer is produced.
    pub async fn start_offer(&mut self) -> Result<Option<SignalingMessage>, NegotiationError> {
        let conn = self.connection.clone().ok_or(NegotiationError::NoConnection)?;
        if self.state != NegotiationState::Idle {
            debug!("Not creating an offer in state {}", self.state);
            return Ok(None);
        }

        let offer = conn.create_offer().await?;
        conn.set_local_description(offer.clone()).await?;
        self.state = NegotiationState::HaveLocalOffer;
        self.local_description_sent = false;
        info!("Local offer applied");

        let message = SignalingMessage::Offer { offer };
        self.local_description = Some(message.clone());
        Ok(Some(message))
    }

    pub async fn handle(&mut self, message: SignalingMessage) -> Result<Outcome, NegotiationError> {
        if self.state == NegotiationState::Closed {
            return Ok(Outcome::Ignored(IgnoreReason::Closed));
        }
        match message {
            SignalingMessage::Offer { offer } => self.on_offer(offer).await,
            SignalingMessage::Answer { answer } => self.on_answer(answer).await,
            SignalingMessage::Candidate { candidate } => self.on_candidate(candidate).await,
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Result<Outcome, NegotiationError> {
        let Some(conn) = self.connection.clone() else {
            warn!("Dropping offer: no peer connection");
            return Ok(Outcome::Ignored(IgnoreReason::NoConnection));
        };

        if self.answered_offer.as_deref() == Some(offer.sdp.as_str()) {
            debug!("Dropping an offer that was already answered");
            return Ok(Outcome::Ignored(IgnoreReason::DuplicateOffer));
        }

        if self.state == NegotiationState::HaveLocalOffer
            || conn.signaling_state().await == SignalingState::HaveLocalOffer
        {
            if let Some(SignalingMessage::Offer { offer: local }) = &self.local_description
                && !yields_to(local, &offer)
            {
                info!("Offer collision, keeping the local offer");
                return Ok(Outcome::Reply(SignalingMessage::Offer {
                    offer: local.clone(),
                }));
            }

            info!("Offer collision, rolling back the local offer");
            conn.rollback().await?;
            self.state = NegotiationState::Idle;
            self.local_description = None;
            // Candidates of the discarded offer are of no use to the peer.
            self.pending_local.clear();
        }

        let offer_sdp = offer.sdp.clone();
        conn.set_remote_description(offer).await?;
        self.state = NegotiationState::HaveRemoteOffer;
        self.remote_description_set = true;
        self.answered_offer = Some(offer_sdp);
        self.flush_remote_candidates(&conn).await;

        let answer = conn.create_answer().await?;
        conn.set_local_description(answer.clone()).await?;
        self.state = NegotiationState::Stable;
        self.local_description_sent = false;
        info!("Remote offer applied, answering");

        let message = SignalingMessage::Answer { answer };
        self.local_description = Some(message.clone());
        Ok(Outcome::Reply(message))
    }

    async fn on_answer(&mut self, answer: SessionDescription) -> Result<Outcome, NegotiationError> {
        let Some(conn) = self.connection.clone() else {
            warn!("Dropping answer: no peer connection");
            return Ok(Outcome::Ignored(IgnoreReason::NoConnection));
        };

        if matches!(
            self.state,
            NegotiationState::Idle | NegotiationState::HaveRemoteOffer
        ) {
            debug!("Dropping answer in state {}", self.state);
            return Ok(Outcome::Ignored(IgnoreReason::UnexpectedAnswer));
        }

        // Either source reporting an applied answer is enough to drop it.
        let live_state = conn.signaling_state().await;
        let live_remote = conn.has_remote_description().await;
        if self.state == NegotiationState::Stable
            || live_state == SignalingState::Stable
            || self.remote_description_set
            || live_remote
        {
            debug!(
                "Dropping duplicate answer (state {}, connection {})",
                self.state, live_state
            );
            return Ok(Outcome::Ignored(IgnoreReason::DuplicateAnswer));
        }

        conn.set_remote_description(answer).await?;
        self.remote_description_set = true;
        self.state = NegotiationState::Stable;
        info!("Remote answer applied");
        self.flush_remote_candidates(&conn).await;

        Ok(Outcome::Applied)
    }

    async fn on_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<Outcome, NegotiationError> {
        let Some(conn) = self.connection.clone() else {
            warn!("Dropping ICE candidate: no peer connection");
            return Ok(Outcome::Ignored(IgnoreReason::NoConnection));
        };

        if !self.remote_description_set && !conn.has_remote_description().await {
            debug!("Queueing ICE candidate until the remote description is set");
            self.pending_remote.push(candidate);
            return Ok(Outcome::Queued);
        }

        conn.add_ice_candidate(candidate).await?;
        Ok(Outcome::Applied)
    }

    async fn flush_remote_candidates(&mut self, conn: &Arc<dyn PeerConnection>) {
        let pending = std::mem::take(&mut self.pending_remote);
        if pending.is_empty() {
            return;
        }
        debug!("Applying {} queued ICE candidate(s)", pending.len());
        for candidate in pending {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!("Failed to add queued ICE candidate: {}", e);
            }
        }
    }

    /// A local candidate is published right away once the local description
    /// of the round went out, and held back before that.
    pub fn on_local_candidate(&mut self, candidate: IceCandidateInit) -> Option<SignalingMessage> {
        if self.state == NegotiationState::Closed {
            return None;
        }
        if self.local_description_sent {
            return Some(SignalingMessage::Candidate { candidate });
        }
        self.pending_local.push(candidate);
        None
    }

    /// The offer or answer of this round while it has not been published.
    pub fn unpublished_local_description(&self) -> Option<SignalingMessage> {
        if self.local_description_sent || self.state == NegotiationState::Closed {
            return None;
        }
        self.local_description.clone()
    }

    /// Marks the offer or answer of this round as published and returns the
    /// candidates held back until now, in gathering order.
    pub fn local_description_sent(&mut self) -> Vec<SignalingMessage> {
        self.local_description_sent = true;
        self.pending_local
            .drain(..)
            .map(|candidate| SignalingMessage::Candidate { candidate })
            .collect()
    }

    pub async fn close(&mut self) -> Result<(), NegotiationError> {
        self.state = NegotiationState::Closed;
        self.local_description = None;
        self.pending_local.clear();
        self.pending_remote.clear();

        let Some(conn) = self.connection.take() else {
            return Ok(());
        };
        conn.close().await
    }
}

/// Both peers compare the same two offers, so exactly one of them yields.
fn yields_to(local: &SessionDescription, remote: &SessionDescription) -> bool {
    local.sdp <= remote.sdp
}
