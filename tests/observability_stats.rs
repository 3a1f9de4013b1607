//! Hub statistics, filtered listings, and the recording sink.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use weft::{
    AgentFilter, AgentType, FabricConfig, FabricEvent, HubClient, MemorySink, MessageKind,
    OrganizationId, RequestId, SendOutcome,
};

#[tokio::test]
async fn stats_track_routing_and_errors() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _a = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _b = fabric.spawn_agent(bob, engine(SilentEngine)).await.unwrap();

    let before = fabric.hub().stats().await;
    assert_eq!(before.registered_agents, 2);
    assert_eq!(before.messages_routed, 0);

    fabric
        .hub()
        .route(signed(&alice_identity, "alice", "bob", MessageKind::Text, "one", None))
        .await
        .unwrap();
    let _ = fabric
        .hub()
        .route(signed(&alice_identity, "alice", "nobody", MessageKind::Text, "two", None))
        .await;

    let after = fabric.hub().stats().await;
    assert_eq!(after.messages_routed, 1);
    assert_eq!(after.routing_errors, 1);
    fabric.stop().await;
}

#[tokio::test]
async fn stats_count_open_and_late_requests() {
    let fabric = testing_fabric().await;
    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _a = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _b = fabric
        .spawn_agent(
            bob,
            engine(DelayedEcho {
                delay: Duration::from_millis(200),
            }),
        )
        .await
        .unwrap();

    let request = signed(
        &alice_identity,
        "alice",
        "bob",
        MessageKind::Command,
        "slow",
        Some(RequestId::generate()),
    );
    let outcome = fabric
        .hub()
        .send_and_wait(request, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::TimedOut { .. }));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = fabric.hub().stats().await;
    assert_eq!(stats.late_responses, 1);
    fabric.stop().await;
}

#[tokio::test]
async fn filtered_listing_reaches_through_the_hub() {
    let fabric = testing_fabric().await;
    let org = OrganizationId::try_new("acme").unwrap();
    let (_, in_org) = spec("in-org", vec![capability("summarize", "summaries")]);
    let in_org = in_org.organization(org.clone());
    let (_, human) = spec("human", vec![]);
    let human = human.agent_type(AgentType::Human);
    let _h1 = fabric.spawn_agent(in_org, engine(SilentEngine)).await.unwrap();
    let _h2 = fabric.spawn_agent(human, engine(SilentEngine)).await.unwrap();

    let everyone = fabric.hub().find_agents(&AgentFilter::any()).await;
    assert_eq!(everyone.len(), 2);

    let org_members = fabric
        .hub()
        .find_agents(&AgentFilter {
            organization_id: Some(org),
            ..AgentFilter::default()
        })
        .await;
    assert_eq!(org_members.len(), 1);
    assert_eq!(org_members[0].agent_id, agent_id("in-org"));

    let humans = fabric
        .hub()
        .find_agents(&AgentFilter {
            agent_type: Some(AgentType::Human),
            ..AgentFilter::default()
        })
        .await;
    assert_eq!(humans.len(), 1);
    assert_eq!(humans[0].agent_id, agent_id("human"));
    fabric.stop().await;
}

#[tokio::test]
async fn memory_sink_records_lifecycle_events() {
    let sink = Arc::new(MemorySink::new());
    let fabric = weft::Fabric::builder()
        .config(FabricConfig::testing())
        .observability(sink.clone())
        .build()
        .await
        .unwrap();

    let (alice_identity, alice) = spec("alice", vec![]);
    let (_, bob) = spec("bob", vec![]);
    let _a = fabric.spawn_agent(alice, engine(SilentEngine)).await.unwrap();
    let _b = fabric.spawn_agent(bob, engine(SilentEngine)).await.unwrap();

    fabric
        .hub()
        .route(signed(&alice_identity, "alice", "bob", MessageKind::Text, "hi", None))
        .await
        .unwrap();
    fabric.remove_agent(&agent_id("bob")).await.unwrap();
    fabric.stop().await;

    assert_eq!(sink.routed_count(), 1);
    let events = sink.events();
    assert!(
        events
            .iter()
            .filter(|event| matches!(event, FabricEvent::Registered { .. }))
            .count()
            >= 2
    );
    assert!(
        events
            .iter()
            .any(|event| matches!(event, FabricEvent::Unregistered { agent_id } if *agent_id == common::agent_id("bob")))
    );
    assert!(events.iter().any(|event| matches!(event, FabricEvent::HubStopped)));
}
