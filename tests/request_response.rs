//! Directed request/response: correlation, timeout, late-delivery recovery.

mod common;

use std::time::Duration;

use common::*;
use weft::{HubClient, LateResult, MessageKind, RequestId, SendOutcome};

#[tokio::test]
async fn request_completes_within_deadline() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _alice = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _bob = fabric.spawn_agent(bob, engine(EchoEngine)).await.unwrap();

    let request_id = RequestId::generate();
    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "do the thing",
        Some(request_id),
    );
    let outcome = fabric
        .hub()
        .send_and_wait(request, Duration::from_secs(2))
        .await
        .unwrap();

    match outcome {
        SendOutcome::Completed {
            request_id: completed,
            response,
        } => {
            assert_eq!(completed, request_id);
            assert_eq!(response.content, "echo: do the thing");
            assert_eq!(response.metadata.request_id, Some(request_id));
            assert_eq!(response.message_type, MessageKind::Response);
        }
        SendOutcome::TimedOut { .. } => panic!("request should complete"),
    }

    match fabric.hub().check_late_result(request_id).await {
        LateResult::Completed => {}
        other => panic!("expected Completed, got {other:?}"),
    }
    fabric.stop().await;
}

#[tokio::test]
async fn timeout_then_late_delivery_is_recoverable() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _alice = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _bob = fabric
        .spawn_agent(
            bob,
            engine(DelayedEcho {
                delay: Duration::from_millis(300),
            }),
        )
        .await
        .unwrap();

    let request_id = RequestId::generate();
    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "slow thing",
        Some(request_id),
    );
    let outcome = fabric
        .hub()
        .send_and_wait(request, Duration::from_millis(100))
        .await
        .unwrap();
    let SendOutcome::TimedOut {
        request_id: timed_out,
    } = outcome
    else {
        panic!("request should time out");
    };
    assert_eq!(timed_out, request_id);

    match fabric.hub().check_late_result(request_id).await {
        LateResult::TimedOut => {}
        other => panic!("expected TimedOut before the reply lands, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    match fabric.hub().check_late_result(request_id).await {
        LateResult::LateReceived(response) => {
            assert_eq!(response.content, "late: slow thing");
        }
        other => panic!("expected LateReceived, got {other:?}"),
    }
    fabric.stop().await;
}

#[tokio::test]
async fn timed_out_partner_is_excluded_from_discovery() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec(
        "bob",
        vec![capability("summarize", "produce concise summaries of text")],
    );
    let _alice = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _bob = fabric
        .spawn_agent(
            bob,
            engine(DelayedEcho {
                delay: Duration::from_secs(5),
            }),
        )
        .await
        .unwrap();

    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "summarize this",
        Some(RequestId::generate()),
    );
    let outcome = fabric
        .hub()
        .send_and_wait(request, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::TimedOut { .. }));

    let for_alice = fabric
        .hub()
        .find_by_capability_description(
            "concise summaries of text",
            Some(&agent_id("alice")),
            weft::DiscoveryOptions::default(),
        )
        .await
        .unwrap();
    assert!(
        for_alice.iter().all(|found| found.agent_id != agent_id("bob")),
        "timed-out partner must be filtered for the requester"
    );

    let for_other = fabric
        .hub()
        .find_by_capability_description(
            "concise summaries of text",
            Some(&agent_id("carol")),
            weft::DiscoveryOptions::default(),
        )
        .await
        .unwrap();
    assert!(
        for_other.iter().any(|found| found.agent_id == agent_id("bob")),
        "other requesters still see the agent"
    );
    fabric.stop().await;
}

#[tokio::test]
async fn request_without_request_id_is_rejected() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _alice = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _bob = fabric.spawn_agent(bob, engine(EchoEngine)).await.unwrap();

    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "untracked",
        None,
    );
    let result = fabric
        .hub()
        .send_and_wait(request, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(weft::HubError::MissingRequestId)));
    fabric.stop().await;
}

#[tokio::test]
async fn engine_failure_returns_error_reply_and_closes_request() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _alice = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _bob = fabric.spawn_agent(bob, engine(FailingEngine)).await.unwrap();

    let request_id = RequestId::generate();
    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "explode",
        Some(request_id),
    );
    let outcome = fabric
        .hub()
        .send_and_wait(request, Duration::from_secs(2))
        .await
        .unwrap();
    match outcome {
        SendOutcome::Completed { response, .. } => {
            assert_eq!(response.message_type, MessageKind::Error);
            assert!(response.content.contains("synthetic failure"));
        }
        SendOutcome::TimedOut { .. } => panic!("error reply should close the request"),
    }
    fabric.stop().await;
}

#[tokio::test]
async fn unknown_request_id_polls_as_unknown() {
    let fabric = testing_fabric().await;
    match fabric.hub().check_late_result(RequestId::generate()).await {
        LateResult::Unknown => {}
        other => panic!("expected Unknown, got {other:?}"),
    }
    fabric.stop().await;
}
