//! Fabric construction, agent lifecycle, and registry equivalence.

mod common;

use common::*;
use weft::{CapabilityName, FabricConfig, HubClient, InboxCapacity, MaxTurns};

#[tokio::test]
async fn fabric_builds_with_every_preset() {
    for config in [
        FabricConfig::development(),
        FabricConfig::production(),
        FabricConfig::testing(),
    ] {
        let fabric = fabric_with(config).await;
        assert!(fabric.hub().is_accepting());
        fabric.stop().await;
        assert!(!fabric.hub().is_accepting());
    }
}

#[tokio::test]
async fn spawned_agent_appears_in_discovery() {
    let fabric = testing_fabric().await;
    let (_, spec) = spec("worker", vec![capability("summarize", "writes summaries")]);
    let handle = fabric.spawn_agent(spec, engine(EchoEngine)).await.unwrap();

    let listed = fabric.hub().list_agents().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].agent_id, agent_id("worker"));
    assert!(listed[0].score.is_none());

    assert!(fabric.registry().is_active(&agent_id("worker")).await);
    let _ = handle;
    fabric.stop().await;
}

#[tokio::test]
async fn register_unregister_register_is_observationally_equivalent() -> anyhow::Result<()> {
    let fabric = testing_fabric().await;
    let (identity, first) = spec("worker", vec![capability("summarize", "writes summaries")]);
    let handle = fabric.spawn_agent(first, engine(EchoEngine)).await?;

    fabric.remove_agent(&agent_id("worker")).await?;
    handle.stop().await;
    assert!(fabric.registry().get(&agent_id("worker")).await.is_none());
    assert!(
        fabric
            .registry()
            .get_by_capability(&CapabilityName::try_new("summarize")?)
            .await
            .is_empty()
    );

    let again = weft::AgentSpec::new(identity)
        .agent_id(agent_id("worker"))
        .capabilities(vec![capability("summarize", "writes summaries")]);
    let handle = fabric.spawn_agent(again, engine(EchoEngine)).await?;

    let found = fabric
        .registry()
        .get_by_capability(&CapabilityName::try_new("summarize")?)
        .await;
    assert_eq!(found.len(), 1);
    assert_eq!(*found[0].agent_id(), agent_id("worker"));
    let _ = handle;
    fabric.stop().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_spawn_is_rejected() {
    let fabric = testing_fabric().await;
    let (_, first) = spec("worker", vec![]);
    let _handle = fabric.spawn_agent(first, engine(EchoEngine)).await.unwrap();

    let (_, second) = spec("worker", vec![]);
    assert!(fabric.spawn_agent(second, engine(EchoEngine)).await.is_err());
    fabric.stop().await;
}

#[tokio::test]
async fn spawn_without_signing_key_fails() {
    let fabric = testing_fabric().await;
    let identity = weft::AgentIdentity::generate().public_only();
    let spec = weft::AgentSpec::new(identity).agent_id(agent_id("mute"));
    assert!(fabric.spawn_agent(spec, engine(EchoEngine)).await.is_err());
    fabric.stop().await;
}

#[tokio::test]
async fn builder_overrides_reach_the_hub() {
    let config = FabricConfig::builder()
        .inbox_capacity(InboxCapacity::try_new(2).unwrap())
        .max_turns(MaxTurns::try_new(2).unwrap())
        .build()
        .unwrap();
    let fabric = fabric_with(config).await;
    assert_eq!(fabric.config().inbox_capacity.as_usize(), 2);
    assert_eq!(fabric.config().max_turns.as_u32(), 2);
    fabric.stop().await;
}
