//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use weft::{
    AgentId, AgentIdentity, AgentSpec, Capability, CapabilityName, EngineError, Fabric,
    FabricConfig, Message, MessageKind, ReasoningEngine, ReplyDraft, RequestId,
};

/// Builds a fabric with the fast testing preset.
pub async fn testing_fabric() -> Fabric {
    Fabric::builder()
        .config(FabricConfig::testing())
        .build()
        .await
        .expect("testing fabric builds")
}

/// Builds a fabric from an explicit config.
pub async fn fabric_with(config: FabricConfig) -> Fabric {
    Fabric::builder()
        .config(config)
        .build()
        .await
        .expect("fabric builds")
}

/// A fresh identity plus a spec registered under a readable id.
pub fn spec(name: &str, capabilities: Vec<Capability>) -> (AgentIdentity, AgentSpec) {
    let identity = AgentIdentity::generate();
    let spec = AgentSpec::new(identity.clone())
        .agent_id(AgentId::try_new(name.to_string()).unwrap())
        .capabilities(capabilities);
    (identity, spec)
}

/// Shorthand capability constructor.
pub fn capability(name: &str, description: &str) -> Capability {
    Capability::new(CapabilityName::try_new(name.to_string()).unwrap(), description)
}

/// Shorthand agent id constructor.
pub fn agent_id(name: &str) -> AgentId {
    AgentId::try_new(name.to_string()).unwrap()
}

/// Builds a signed message between named agents.
pub fn signed(
    identity: &AgentIdentity,
    from: &str,
    to: &str,
    kind: MessageKind,
    content: &str,
    request_id: Option<RequestId>,
) -> Message {
    let mut builder = Message::builder(agent_id(from), agent_id(to))
        .kind(kind)
        .content(content);
    if let Some(request_id) = request_id {
        builder = builder.request_id(request_id);
    }
    builder.build(identity).expect("message signs")
}

/// Replies with the inbound content, one token per turn.
pub struct EchoEngine;

#[async_trait]
impl ReasoningEngine for EchoEngine {
    async fn handle(&self, message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
        Ok(Some(ReplyDraft::text(format!("echo: {}", message.content))))
    }

    fn last_token_usage(&self) -> u64 {
        1
    }
}

/// Consumes everything, replies to nothing.
pub struct SilentEngine;

#[async_trait]
impl ReasoningEngine for SilentEngine {
    async fn handle(&self, _message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
        Ok(None)
    }

    fn last_token_usage(&self) -> u64 {
        1
    }
}

/// Echoes after a fixed delay; used to force request timeouts.
pub struct DelayedEcho {
    pub delay: Duration,
}

#[async_trait]
impl ReasoningEngine for DelayedEcho {
    async fn handle(&self, message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(ReplyDraft::text(format!("late: {}", message.content))))
    }

    fn last_token_usage(&self) -> u64 {
        1
    }
}

/// Always fails; exercises the ERROR reply path.
pub struct FailingEngine;

#[async_trait]
impl ReasoningEngine for FailingEngine {
    async fn handle(&self, _message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
        Err(EngineError::new("synthetic failure"))
    }

    fn last_token_usage(&self) -> u64 {
        1
    }
}

/// Echoes while reporting a configurable token usage per turn.
pub struct HeavyEngine {
    pub usage: u64,
}

#[async_trait]
impl ReasoningEngine for HeavyEngine {
    async fn handle(&self, message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
        Ok(Some(ReplyDraft::text(format!("heavy: {}", message.content))))
    }

    fn last_token_usage(&self) -> u64 {
        self.usage
    }
}

/// Wraps an engine in an Arc for spawn_agent.
pub fn engine<E: ReasoningEngine + 'static>(engine: E) -> Arc<dyn ReasoningEngine> {
    Arc::new(engine)
}

/// Registers an agent directly at the hub without spawning a runtime, so
/// tests can inspect (or deliberately neglect) its raw mailbox.
pub async fn park_agent(
    fabric: &Fabric,
    name: &str,
) -> (AgentIdentity, weft::AgentMailbox) {
    let identity = AgentIdentity::generate();
    let metadata = weft::AgentMetadata {
        agent_id: agent_id(name),
        agent_type: weft::AgentType::Ai,
        interaction_modes: vec![weft::InteractionMode::AgentToAgent],
        capabilities: vec![],
        organization_id: None,
        payment_address: None,
        custom: std::collections::BTreeMap::new(),
    };
    let registration = weft::AgentRegistration::new(metadata, &identity);
    let mailbox = fabric.hub().register_agent(registration).await.unwrap();
    (identity, mailbox)
}
