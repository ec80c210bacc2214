use std::sync::Arc;

use grow_core::{IceCandidateInit, SdpType, SessionDescription, SignalingMessage};
use grow_rtc::NegotiationError;
use grow_rtc::negotiation::{
    IgnoreReason, NegotiationState, Negotiator, Outcome, PeerConnection, SignalingState,
};
use grow_rtc::transport::ConnectionEvent;
use tokio::sync::mpsc;

use crate::integration::init_tracing;
use crate::utils::{Call, FakePeerConnection};

fn attached(label: &str) -> (
    Negotiator,
    Arc<FakePeerConnection>,
    mpsc::Receiver<ConnectionEvent>,
) {
    let (tx, rx) = mpsc::channel(16);
    let connection = Arc::new(FakePeerConnection::new(label, tx));
    let mut negotiator = Negotiator::new();
    negotiator.attach(connection.clone());
    (negotiator, connection, rx)
}

fn answer(sdp: &str) -> SignalingMessage {
    SignalingMessage::Answer {
        answer: SessionDescription::answer(sdp),
    }
}

fn offer(sdp: &str) -> SignalingMessage {
    SignalingMessage::Offer {
        offer: SessionDescription::offer(sdp),
    }
}

fn candidate(c: &str) -> SignalingMessage {
    SignalingMessage::Candidate {
        candidate: IceCandidateInit::new(c),
    }
}

#[tokio::test]
async fn test_duplicate_answer_is_applied_once() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");

    let sent = negotiator.start_offer().await.unwrap();
    assert!(matches!(sent, Some(SignalingMessage::Offer { .. })));
    assert_eq!(negotiator.state(), NegotiationState::HaveLocalOffer);

    let first = negotiator.handle(answer("v=0 answer b")).await.unwrap();
    let second = negotiator.handle(answer("v=0 answer b")).await.unwrap();

    assert_eq!(first, Outcome::Applied);
    assert_eq!(second, Outcome::Ignored(IgnoreReason::DuplicateAnswer));
    assert_eq!(connection.count(&Call::SetRemote(SdpType::Answer)), 1);
    assert_eq!(negotiator.state(), NegotiationState::Stable);
    assert!(negotiator.remote_description_set());
}

#[tokio::test]
async fn test_answer_rejected_when_connection_already_stable() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");
    negotiator.start_offer().await.unwrap();

    // Applied behind the negotiator's back: only the live connection knows.
    connection
        .set_remote_description(SessionDescription::answer("v=0 out of band"))
        .await
        .unwrap();
    assert_eq!(negotiator.state(), NegotiationState::HaveLocalOffer);
    assert_eq!(connection.signaling_state().await, SignalingState::Stable);

    let outcome = negotiator.handle(answer("v=0 answer b")).await.unwrap();
    assert_eq!(outcome, Outcome::Ignored(IgnoreReason::DuplicateAnswer));
    assert_eq!(connection.count(&Call::SetRemote(SdpType::Answer)), 1);
}

#[tokio::test]
async fn test_answer_without_offer_is_ignored() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");

    let outcome = negotiator.handle(answer("v=0 stray")).await.unwrap();

    assert_eq!(outcome, Outcome::Ignored(IgnoreReason::UnexpectedAnswer));
    assert!(connection.calls().is_empty());
    assert_eq!(negotiator.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn test_candidate_before_connection_is_dropped() {
    init_tracing();
    let mut negotiator = Negotiator::new();

    let outcome = negotiator.handle(candidate("candidate:early")).await.unwrap();

    assert_eq!(outcome, Outcome::Ignored(IgnoreReason::NoConnection));
    assert_eq!(negotiator.pending_remote_candidates(), 0);
    assert_eq!(negotiator.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn test_early_candidates_flush_in_order_after_offer() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("b");

    for c in ["candidate:1", "candidate:2", "candidate:3"] {
        assert_eq!(negotiator.handle(candidate(c)).await.unwrap(), Outcome::Queued);
    }
    assert_eq!(negotiator.pending_remote_candidates(), 3);

    let outcome = negotiator.handle(offer("v=0 offer a")).await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Reply(SignalingMessage::Answer { .. })
    ));

    assert_eq!(
        connection.calls(),
        vec![
            Call::SetRemote(SdpType::Offer),
            Call::AddCandidate("candidate:1".to_owned()),
            Call::AddCandidate("candidate:2".to_owned()),
            Call::AddCandidate("candidate:3".to_owned()),
            Call::CreateAnswer,
            Call::SetLocal(SdpType::Answer),
        ]
    );
    assert_eq!(negotiator.pending_remote_candidates(), 0);
    assert_eq!(negotiator.state(), NegotiationState::Stable);

    assert_eq!(
        negotiator.handle(candidate("candidate:4")).await.unwrap(),
        Outcome::Applied
    );
    assert_eq!(connection.added_candidates().len(), 4);
}

#[tokio::test]
async fn test_offer_collision_polite_side_rolls_back() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");
    negotiator.start_offer().await.unwrap();
    negotiator.on_local_candidate(IceCandidateInit::new("candidate:old"));

    // "v=0 offer a #1" sorts before "v=0 offer b", so this side yields.
    let outcome = negotiator.handle(offer("v=0 offer b")).await.unwrap();

    assert!(matches!(
        outcome,
        Outcome::Reply(SignalingMessage::Answer { .. })
    ));
    assert_eq!(
        connection.calls(),
        vec![
            Call::CreateOffer,
            Call::SetLocal(SdpType::Offer),
            Call::Rollback,
            Call::SetRemote(SdpType::Offer),
            Call::CreateAnswer,
            Call::SetLocal(SdpType::Answer),
        ]
    );
    assert_eq!(negotiator.state(), NegotiationState::Stable);

    // Candidates gathered for the discarded offer are dropped.
    assert!(negotiator.local_description_sent().is_empty());

    // The answer to the rolled back offer is stale now.
    let stale = negotiator.handle(answer("v=0 answer b")).await.unwrap();
    assert_eq!(stale, Outcome::Ignored(IgnoreReason::DuplicateAnswer));
}

#[tokio::test]
async fn test_offer_collision_impolite_side_keeps_its_offer() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("b");
    let Some(SignalingMessage::Offer { offer: local }) = negotiator.start_offer().await.unwrap()
    else {
        panic!("expected an offer");
    };

    let outcome = negotiator.handle(offer("v=0 offer a #1")).await.unwrap();

    // The local offer is sent again in case the first copy was lost.
    assert_eq!(outcome, Outcome::Reply(SignalingMessage::Offer { offer: local }));
    assert_eq!(
        connection.calls(),
        vec![Call::CreateOffer, Call::SetLocal(SdpType::Offer)]
    );
    assert_eq!(negotiator.state(), NegotiationState::HaveLocalOffer);

    assert_eq!(
        negotiator.handle(answer("v=0 answer a")).await.unwrap(),
        Outcome::Applied
    );
    assert_eq!(negotiator.state(), NegotiationState::Stable);
    assert_eq!(connection.count(&Call::CreateAnswer), 0);
}

#[tokio::test]
async fn test_answered_offer_is_not_answered_again() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");

    let first = negotiator.handle(offer("v=0 offer b #1")).await.unwrap();
    let again = negotiator.handle(offer("v=0 offer b #1")).await.unwrap();

    assert!(matches!(first, Outcome::Reply(SignalingMessage::Answer { .. })));
    assert_eq!(again, Outcome::Ignored(IgnoreReason::DuplicateOffer));
    assert_eq!(connection.count(&Call::CreateAnswer), 1);
    assert_eq!(negotiator.state(), NegotiationState::Stable);
}

#[tokio::test]
async fn test_local_description_is_kept_until_published() {
    init_tracing();
    let (mut negotiator, _connection, _events) = attached("a");
    assert_eq!(negotiator.unpublished_local_description(), None);

    let sent = negotiator.start_offer().await.unwrap();
    assert_eq!(negotiator.unpublished_local_description(), sent);

    negotiator.local_description_sent();
    assert_eq!(negotiator.unpublished_local_description(), None);
}

#[tokio::test]
async fn test_apply_failure_leaves_negotiator_usable() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("b");
    connection.fail_remote_descriptions();

    let err = negotiator.handle(offer("v=0 broken")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::Apply(_)));
    assert!(!negotiator.remote_description_set());

    assert_eq!(
        negotiator.handle(candidate("candidate:1")).await.unwrap(),
        Outcome::Queued
    );
}

#[tokio::test]
async fn test_only_one_offer_per_round() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");

    assert!(negotiator.start_offer().await.unwrap().is_some());
    assert!(negotiator.start_offer().await.unwrap().is_none());

    assert_eq!(connection.count(&Call::CreateOffer), 1);
}

#[tokio::test]
async fn test_local_candidates_wait_for_local_description() {
    init_tracing();
    let (mut negotiator, _connection, _events) = attached("a");
    negotiator.start_offer().await.unwrap();

    assert!(
        negotiator
            .on_local_candidate(IceCandidateInit::new("candidate:early"))
            .is_none()
    );

    let flushed = negotiator.local_description_sent();
    assert_eq!(flushed, vec![candidate("candidate:early")]);

    let late = negotiator.on_local_candidate(IceCandidateInit::new("candidate:late"));
    assert_eq!(late, Some(candidate("candidate:late")));
}

#[tokio::test]
async fn test_close_stops_processing() {
    init_tracing();
    let (mut negotiator, connection, _events) = attached("a");
    negotiator.start_offer().await.unwrap();

    negotiator.close().await.unwrap();

    assert_eq!(negotiator.state(), NegotiationState::Closed);
    assert!(connection.is_closed().await);
    assert!(!negotiator.has_connection());
    assert_eq!(
        negotiator.handle(answer("v=0 late")).await.unwrap(),
        Outcome::Ignored(IgnoreReason::Closed)
    );
    assert!(
        negotiator
            .on_local_candidate(IceCandidateInit::new("candidate:late"))
            .is_none()
    );
}
