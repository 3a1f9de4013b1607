//! # Weft — an interconnect fabric for autonomous agents
//!
//! Weft is the runtime substrate that lets independent agents discover one
//! another by capability, exchange cryptographically signed messages
//! through a shared hub, and orchestrate request/response collaborations
//! with timeouts and late-delivery recovery.
//!
//! ## Core pieces
//!
//! - [`identity::AgentIdentity`]: Ed25519 keypairs, signing, DID derivation
//! - [`message::Message`]: the canonical signed envelope
//! - [`registry::Registry`]: registration, capability indexing, discovery
//! - [`hub::Hub`]: authentication, routing, interceptors, correlation
//! - [`control::InteractionControl`]: rate limits, cooldown, turn caps
//! - [`runtime::AgentRuntime`]: the per-agent cooperative loop
//! - [`fabric::Fabric`]: the construction root owning all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use weft::{
//!     AgentIdentity, AgentSpec, Capability, CapabilityName, EngineError, Fabric,
//!     FabricConfig, Message, ReasoningEngine, ReplyDraft,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ReasoningEngine for Echo {
//!     async fn handle(&self, message: &Message) -> Result<Option<ReplyDraft>, EngineError> {
//!         Ok(Some(ReplyDraft::text(message.content.clone())))
//!     }
//!     fn last_token_usage(&self) -> u64 {
//!         1
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fabric = Fabric::builder().config(FabricConfig::development()).build().await?;
//! let identity = AgentIdentity::generate();
//! let spec = AgentSpec::new(identity).capabilities(vec![Capability::new(
//!     CapabilityName::try_new("echo")?,
//!     "repeat whatever arrives",
//! )]);
//! let handle = fabric.spawn_agent(spec, Arc::new(Echo)).await?;
//! # let _ = handle;
//! fabric.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Collaborators — LLM reasoning, embedding backends, key persistence,
//! observability — plug in through the [`runtime::ReasoningEngine`],
//! [`capability::EmbeddingIndex`], [`keystore::KeyStore`], and
//! [`observability::ObservabilitySink`] traits.

pub mod capability;
pub mod config;
pub mod control;
pub mod domain_types;
pub mod error;
pub mod fabric;
pub mod hub;
pub mod identity;
pub mod keystore;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod runtime;

pub use crate::capability::{Capability, CapabilityIndex, EmbeddingIndex, IndexError, ScoredAgent};
pub use crate::config::{ConfigError, FabricConfig, FabricConfigBuilder};
pub use crate::control::{CooldownListener, InteractionControl, Verdict};
pub use crate::domain_types::{
    AgentId, CapabilityName, ConversationKey, InboxCapacity, InterceptorId, MaxTurns, MessageId,
    OrganizationId, PaymentAddress, ProtocolVersion, RequestId, RequestTimeoutMs,
    RetentionWindowMs, ScoreThreshold, SearchLimit, TokenLimit,
};
pub use crate::error::FabricError;
pub use crate::fabric::{AgentSpec, Fabric, FabricBuilder};
pub use crate::hub::{
    AgentMailbox, CancelReason, Hub, HubClient, HubError, HubStats, Interceptor, LateResult,
    SendOutcome,
};
pub use crate::identity::{AgentIdentity, Did, IdentityError};
pub use crate::keystore::{FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use crate::message::{
    Message, MessageBuilder, MessageError, MessageKind, MessageMetadata,
};
pub use crate::observability::{FabricEvent, MemorySink, NoopSink, ObservabilitySink, init_tracing};
pub use crate::protocol::{CollaborationProtocol, ProtocolError, SimplePeerProtocol};
pub use crate::registry::{
    AgentFilter, AgentMetadata, AgentRegistration, AgentType, DiscoveredAgent, DiscoveryOptions,
    InteractionMode, Registry, RegistryError,
};
pub use crate::runtime::{AgentHandle, AgentRuntime, EngineError, ReasoningEngine, ReplyDraft};
