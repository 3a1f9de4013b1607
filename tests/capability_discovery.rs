//! Capability discovery: exact, semantic (degraded), and special requests.

mod common;

use std::time::Duration;

use common::*;
use weft::{Capability, CapabilityName, DiscoveryOptions, HubClient, MessageKind, RequestId};

#[tokio::test]
async fn exact_lookup_returns_only_matching_agents() {
    let fabric = testing_fabric().await;
    let (_, r1) = spec("r1", vec![capability("summarize", "writes summaries")]);
    let (_, r2) = spec("r2", vec![capability("translate", "translates text")]);
    let _h1 = fabric.spawn_agent(r1, engine(SilentEngine)).await.unwrap();
    let _h2 = fabric.spawn_agent(r2, engine(SilentEngine)).await.unwrap();

    let found = fabric
        .hub()
        .find_by_capability(&CapabilityName::try_new("summarize").unwrap())
        .await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].agent_id, agent_id("r1"));

    let missing = fabric
        .hub()
        .find_by_capability(&CapabilityName::try_new("nope").unwrap())
        .await;
    assert!(missing.is_empty());
    fabric.stop().await;
}

#[tokio::test]
async fn degraded_semantic_search_ranks_relevant_descriptions_first() {
    let fabric = testing_fabric().await;
    let (_, r1) = spec(
        "r1",
        vec![capability("summarize", "produce concise summaries of long text")],
    );
    let (_, r2) = spec(
        "r2",
        vec![capability("translate", "translate between English and Spanish")],
    );
    let _h1 = fabric.spawn_agent(r1, engine(SilentEngine)).await.unwrap();
    let _h2 = fabric.spawn_agent(r2, engine(SilentEngine)).await.unwrap();

    let results = fabric
        .hub()
        .find_by_capability_description(
            "produce a concise summaries digest of this text",
            None,
            DiscoveryOptions {
                limit: Some(2),
                min_score: Some(0.0),
                ..DiscoveryOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].agent_id, agent_id("r1"));
    let r1_score = results[0].score.unwrap();
    assert!(r1_score > 0.0);
    if let Some(second) = results.get(1) {
        assert!(r1_score > second.score.unwrap());
    }
    fabric.stop().await;
}

#[tokio::test]
async fn semantic_results_respect_min_score_and_limit() {
    let fabric = testing_fabric().await;
    for n in 0..4 {
        let (_, agent_spec) = spec(
            &format!("agent-{n}"),
            vec![capability(
                &format!("cap-{n}"),
                "produce concise summaries of long text",
            )],
        );
        let _handle = fabric
            .spawn_agent(agent_spec, engine(SilentEngine))
            .await
            .unwrap();
    }

    let limited = fabric
        .hub()
        .find_by_capability_description(
            "concise summaries of text",
            None,
            DiscoveryOptions {
                limit: Some(2),
                min_score: Some(0.0),
                ..DiscoveryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    let strict = fabric
        .hub()
        .find_by_capability_description(
            "unrelated quantum chromodynamics lattice",
            None,
            DiscoveryOptions {
                min_score: Some(0.9),
                ..DiscoveryOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(strict.is_empty());
    fabric.stop().await;
}

#[tokio::test]
async fn discovery_surfaces_payment_addresses() {
    let fabric = testing_fabric().await;
    let (_, paid) = spec("paid", vec![capability("summarize", "writes summaries")]);
    let paid = paid.payment_address(weft::PaymentAddress::try_new("pay:me:42").unwrap());
    let _h = fabric.spawn_agent(paid, engine(SilentEngine)).await.unwrap();

    let found = fabric
        .hub()
        .find_by_capability(&CapabilityName::try_new("summarize").unwrap())
        .await;
    assert_eq!(
        found[0].payment_address,
        Some(weft::PaymentAddress::try_new("pay:me:42").unwrap())
    );
    fabric.stop().await;
}

#[tokio::test]
async fn capability_request_bypasses_the_engine() {
    let fabric = testing_fabric().await;
    let (alice_identity, mut alice_mailbox) = park_agent(&fabric, "alice").await;
    // A failing engine proves the runtime answered without consulting it.
    let (_, bob) = spec("bob", vec![capability("summarize", "writes summaries")]);
    let _b = fabric.spawn_agent(bob, engine(FailingEngine)).await.unwrap();

    let request_id = RequestId::generate();
    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::CapabilityRequest,
        "what can you do",
        Some(request_id),
    );
    fabric.hub().route(request).await.unwrap();

    let response = alice_mailbox.inbox.recv().await.unwrap();
    assert_eq!(response.message_type, MessageKind::CapabilityResponse);
    assert_eq!(response.metadata.request_id, Some(request_id));
    let listed: Vec<Capability> = serde_json::from_str(&response.content).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, CapabilityName::try_new("summarize").unwrap());
    fabric.stop().await;
}

#[tokio::test]
async fn ping_bypasses_the_engine() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _a = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _b = fabric.spawn_agent(bob, engine(FailingEngine)).await.unwrap();

    let request_id = RequestId::generate();
    let ping = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Ping,
        "ping",
        Some(request_id),
    );
    // PING replies echo the request id but arrive as PING, which does not
    // close pending requests; observe it through the requester's inbox via
    // a scoped interceptor instead.
    let seen: std::sync::Arc<std::sync::Mutex<Vec<weft::Message>>> =
        std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let observer = move |message: &weft::Message| -> Result<
        (),
        Box<dyn std::error::Error + Send + Sync>,
    > {
        sink.lock().unwrap().push(message.clone());
        Ok(())
    };
    fabric.hub().add_agent_interceptor(
        agent_id("alice"),
        std::sync::Arc::new(observer) as std::sync::Arc<dyn weft::Interceptor>,
    );

    fabric.hub().route(ping).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let observed = seen.lock().unwrap();
    assert!(
        observed
            .iter()
            .any(|message| message.message_type == MessageKind::Ping
                && message.sender_id == agent_id("bob")
                && message.content == "pong"),
        "bob must answer the ping without engine involvement"
    );
    fabric.stop().await;
}
