//! The fabric construction root
//!
//! [`Fabric`] owns the registry, the hub, and the configuration. There is
//! no module-scope state anywhere in the crate: everything an agent or an
//! embedder touches hangs off an explicitly constructed fabric.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::capability::{Capability, CapabilityIndex, EmbeddingIndex};
use crate::config::{ConfigError, FabricConfig};
use crate::control::InteractionControl;
use crate::domain_types::{AgentId, OrganizationId, PaymentAddress};
use crate::error::FabricError;
use crate::hub::{Hub, HubClient};
use crate::identity::{AgentIdentity, IdentityError};
use crate::observability::{NoopSink, ObservabilitySink};
use crate::registry::{
    AgentMetadata, AgentRegistration, AgentType, InteractionMode, Registry,
};
use crate::runtime::{AgentHandle, AgentRuntime, ReasoningEngine};

/// Everything needed to bring one agent onto the fabric.
#[derive(Debug)]
pub struct AgentSpec {
    /// Signing identity; the agent id defaults to its DID.
    pub identity: AgentIdentity,
    pub agent_id: Option<AgentId>,
    pub agent_type: AgentType,
    pub interaction_modes: Vec<InteractionMode>,
    pub capabilities: Vec<Capability>,
    pub organization_id: Option<OrganizationId>,
    pub payment_address: Option<PaymentAddress>,
    pub owner_id: Option<String>,
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl AgentSpec {
    /// Starts a spec for an AI agent speaking agent-to-agent.
    #[must_use]
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            agent_id: None,
            agent_type: AgentType::Ai,
            interaction_modes: vec![InteractionMode::AgentToAgent],
            capabilities: Vec::new(),
            organization_id: None,
            payment_address: None,
            owner_id: None,
            custom: BTreeMap::new(),
        }
    }

    /// Overrides the agent id (defaults to the identity's DID).
    #[must_use]
    pub fn agent_id(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Declares the agent's capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Marks the agent as human-driven.
    #[must_use]
    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    /// Groups the agent under an organization.
    #[must_use]
    pub fn organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Attaches a settlement address surfaced in discovery and responses.
    #[must_use]
    pub fn payment_address(mut self, payment_address: PaymentAddress) -> Self {
        self.payment_address = Some(payment_address);
        self
    }

    /// Records the owning principal.
    #[must_use]
    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    fn resolved_agent_id(&self) -> Result<AgentId, FabricError> {
        match &self.agent_id {
            Some(agent_id) => Ok(agent_id.clone()),
            None => AgentId::try_new(self.identity.did().to_string())
                .map_err(|_| IdentityError::InvalidPublicKey.into()),
        }
    }
}

/// Builder wiring collaborators into a fabric.
pub struct FabricBuilder {
    config: FabricConfig,
    embedder: Option<Arc<dyn EmbeddingIndex>>,
    sink: Arc<dyn ObservabilitySink>,
}

impl FabricBuilder {
    /// Sets the fabric configuration.
    #[must_use]
    pub fn config(mut self, config: FabricConfig) -> Self {
        self.config = config;
        self
    }

    /// Plugs in a vector backend for semantic capability search. Without
    /// one the index runs in degraded lexical mode.
    #[must_use]
    pub fn embedding_index(mut self, embedder: Arc<dyn EmbeddingIndex>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Plugs in an observability sink.
    #[must_use]
    pub fn observability(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validates the configuration, wires the components, and starts the
    /// hub workers.
    pub async fn build(self) -> Result<Fabric, ConfigError> {
        self.config.validate()?;
        let index = CapabilityIndex::new(self.embedder);
        let registry = Arc::new(Registry::with_sink(
            index,
            self.config.liveness_threshold.as_duration(),
            Arc::clone(&self.sink),
        ));
        let hub = Hub::new(self.config.clone(), Arc::clone(&registry), Arc::clone(&self.sink));
        hub.start().await;
        info!("fabric ready");
        Ok(Fabric {
            config: self.config,
            registry,
            hub,
            sink: self.sink,
        })
    }
}

/// An assembled fabric: registry + hub + interaction control defaults.
pub struct Fabric {
    config: FabricConfig,
    registry: Arc<Registry>,
    hub: Arc<Hub>,
    sink: Arc<dyn ObservabilitySink>,
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl Fabric {
    /// Starts a builder with the development configuration.
    #[must_use]
    pub fn builder() -> FabricBuilder {
        FabricBuilder {
            config: FabricConfig::development(),
            embedder: None,
            sink: Arc::new(NoopSink),
        }
    }

    /// The hub, for routing and discovery.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The registry, for direct lookups.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The configuration in force.
    #[must_use]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Registers an agent and spawns its runtime loop around the given
    /// reasoning engine.
    pub async fn spawn_agent(
        &self,
        spec: AgentSpec,
        engine: Arc<dyn ReasoningEngine>,
    ) -> Result<AgentHandle, FabricError> {
        let agent_id = spec.resolved_agent_id()?;
        if !spec.identity.can_sign() {
            return Err(IdentityError::NoSigningCapability {
                did: spec.identity.did().clone(),
            }
            .into());
        }

        let metadata = AgentMetadata {
            agent_id: agent_id.clone(),
            agent_type: spec.agent_type,
            interaction_modes: spec.interaction_modes.clone(),
            capabilities: spec.capabilities.clone(),
            organization_id: spec.organization_id.clone(),
            payment_address: spec.payment_address.clone(),
            custom: spec.custom.clone(),
        };
        let mut registration = AgentRegistration::new(metadata, &spec.identity);
        registration.owner_id = spec.owner_id.clone();

        let mailbox = self.hub.register_agent(registration).await?;

        let control = Arc::new(InteractionControl::new(
            agent_id.clone(),
            self.config.tokens_per_minute,
            self.config.tokens_per_hour,
            self.config.max_turns,
        ));
        let sink = Arc::clone(&self.sink);
        control.add_cooldown_listener(Arc::new(move |agent, until| {
            sink.on_cooldown(agent, until);
        }));

        let hub_client: Arc<dyn HubClient> = Arc::clone(&self.hub) as Arc<dyn HubClient>;
        Ok(AgentRuntime::spawn(
            mailbox,
            spec.identity,
            spec.capabilities,
            spec.payment_address,
            hub_client,
            engine,
            control,
        ))
    }

    /// Removes an agent from the fabric, stopping its runtime.
    pub async fn remove_agent(&self, agent_id: &AgentId) -> Result<(), FabricError> {
        Ok(self.hub.unregister_agent(agent_id).await?)
    }

    /// Stops the whole fabric: hub, workers, and every agent runtime.
    pub async fn stop(&self) {
        self.hub.stop().await;
    }
}
