//! Bounded inboxes, backpressure, and per-sender FIFO ordering.

mod common;

use std::time::Duration;

use common::*;
use weft::{FabricConfig, HubClient, HubError, InboxCapacity, MessageKind};

#[tokio::test]
async fn full_inbox_yields_backpressure_then_recovers_in_order() {
    let config = FabricConfig::builder()
        .inbox_capacity(InboxCapacity::try_new(2).unwrap())
        .build()
        .unwrap();
    let fabric = fabric_with(config).await;

    let (alice_identity, _alice_mailbox) = park_agent(&fabric, "alice").await;
    let (_, mut bob_mailbox) = park_agent(&fabric, "bob").await;

    for n in 1..=2 {
        let message = signed(
            &alice_identity,
            "alice",
            "bob",
            MessageKind::Text,
            &format!("m{n}"),
            None,
        );
        fabric.hub().route(message).await.unwrap();
    }

    let third = signed(&alice_identity, "alice", "bob", MessageKind::Text, "m3", None);
    let result = fabric.hub().route(third).await;
    assert!(matches!(result, Err(HubError::Backpressure { .. })));

    // Draining one slot lets a later send through.
    let first = bob_mailbox.inbox.recv().await.unwrap();
    assert_eq!(first.content, "m1");

    let fourth = signed(&alice_identity, "alice", "bob", MessageKind::Text, "m4", None);
    fabric.hub().route(fourth).await.unwrap();

    let second = bob_mailbox.inbox.recv().await.unwrap();
    let third_delivered = bob_mailbox.inbox.recv().await.unwrap();
    assert_eq!(second.content, "m2");
    assert_eq!(third_delivered.content, "m4");
    fabric.stop().await;
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_send_order() {
    let fabric = testing_fabric().await;
    let (alice_identity, _alice_mailbox) = park_agent(&fabric, "alice").await;
    let (_, mut bob_mailbox) = park_agent(&fabric, "bob").await;

    for n in 0..10 {
        let message = signed(
            &alice_identity,
            "alice",
            "bob",
            MessageKind::Text,
            &format!("seq-{n}"),
            None,
        );
        fabric.hub().route(message).await.unwrap();
    }

    for n in 0..10 {
        let received = bob_mailbox.inbox.recv().await.unwrap();
        assert_eq!(received.content, format!("seq-{n}"));
    }
    fabric.stop().await;
}

#[tokio::test]
async fn interleaved_senders_each_preserve_their_own_order() {
    let fabric = testing_fabric().await;
    let (alice_identity, _a) = park_agent(&fabric, "alice").await;
    let (carol_identity, _c) = park_agent(&fabric, "carol").await;
    let (_, mut bob_mailbox) = park_agent(&fabric, "bob").await;

    for n in 0..5 {
        let from_alice = signed(
            &alice_identity,
            "alice",
            "bob",
            MessageKind::Text,
            &format!("alice-{n}"),
            None,
        );
        fabric.hub().route(from_alice).await.unwrap();
        let from_carol = signed(
            &carol_identity,
            "carol",
            "bob",
            MessageKind::Text,
            &format!("carol-{n}"),
            None,
        );
        fabric.hub().route(from_carol).await.unwrap();
    }

    let mut alice_seen = Vec::new();
    let mut carol_seen = Vec::new();
    for _ in 0..10 {
        let received = bob_mailbox.inbox.recv().await.unwrap();
        if received.sender_id == agent_id("alice") {
            alice_seen.push(received.content);
        } else {
            carol_seen.push(received.content);
        }
    }
    let expected_alice: Vec<String> = (0..5).map(|n| format!("alice-{n}")).collect();
    let expected_carol: Vec<String> = (0..5).map(|n| format!("carol-{n}")).collect();
    assert_eq!(alice_seen, expected_alice);
    assert_eq!(carol_seen, expected_carol);
    fabric.stop().await;
}

#[tokio::test]
async fn unsigned_and_tampered_messages_never_reach_the_inbox() {
    let fabric = testing_fabric().await;
    let (alice_identity, mut alice_mailbox) = park_agent(&fabric, "alice").await;
    let (_, mut bob_mailbox) = park_agent(&fabric, "bob").await;

    let unsigned = weft::Message::builder(agent_id("alice"), agent_id("bob"))
        .content("no signature")
        .build_unsigned();
    assert!(matches!(
        fabric.hub().route(unsigned).await,
        Err(HubError::AuthenticationFailure { .. })
    ));

    let mut tampered = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Text,
        "original",
        None,
    );
    tampered.content = "forged".into();
    assert!(matches!(
        fabric.hub().route(tampered).await,
        Err(HubError::AuthenticationFailure { .. })
    ));

    // The sender is told; the receiver never sees either message.
    let notice = alice_mailbox.inbox.recv().await.unwrap();
    assert_eq!(notice.message_type, MessageKind::Error);
    assert!(notice.is_hub_notice());

    tokio::time::timeout(Duration::from_millis(100), bob_mailbox.inbox.recv())
        .await
        .expect_err("nothing may be delivered to the receiver");
    fabric.stop().await;
}

#[tokio::test]
async fn unknown_receiver_bounces_an_error_to_the_sender() {
    let fabric = testing_fabric().await;
    let (alice_identity, mut alice_mailbox) = park_agent(&fabric, "alice").await;

    let message = signed(
        &alice_identity,
        "alice",
        "nobody",
        MessageKind::Text,
        "hello?",
        None,
    );
    assert!(matches!(
        fabric.hub().route(message).await,
        Err(HubError::UnknownReceiver { .. })
    ));

    let notice = alice_mailbox.inbox.recv().await.unwrap();
    assert_eq!(notice.message_type, MessageKind::Error);
    assert!(notice.content.contains("not registered"));
    fabric.stop().await;
}
