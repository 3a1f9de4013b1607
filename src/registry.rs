//! Agent registry: registration lifecycle, metadata store, discovery
//!
//! The registry wraps the capability index and is the single source of
//! truth for who is on the fabric. Writers (register/unregister) are
//! serialized behind a write lock and update the capability index inside
//! the same critical section; readers run concurrently.

use std::collections::HashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::capability::{Capability, CapabilityIndex, IndexError};
use crate::domain_types::{AgentId, CapabilityName, OrganizationId, PaymentAddress};
use crate::identity::AgentIdentity;
use crate::observability::{FabricEvent, NoopSink, ObservabilitySink};

/// Registry operation failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent already registered: {agent_id}")]
    DuplicateAgent { agent_id: AgentId },

    #[error("identity for {agent_id} is not verified")]
    UnverifiedIdentity { agent_id: AgentId },

    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Whether an agent is driven by a human or by software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentType {
    Human,
    Ai,
}

/// Interaction surfaces an agent accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionMode {
    HumanToAgent,
    AgentToAgent,
}

/// Descriptive metadata an agent registers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub interaction_modes: Vec<InteractionMode>,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<PaymentAddress>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

/// A complete registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub metadata: AgentMetadata,
    /// Public half only; the registry never holds signing keys.
    pub identity: AgentIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl AgentRegistration {
    /// Assembles a registration from metadata and an identity, stamping the
    /// registration time and stripping the signing key.
    #[must_use]
    pub fn new(metadata: AgentMetadata, identity: &AgentIdentity) -> Self {
        Self {
            metadata,
            identity: identity.public_only(),
            owner_id: None,
            registered_at: Utc::now(),
        }
    }

    /// The registered agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.metadata.agent_id
    }
}

/// Client-facing discovery result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAgent {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    pub agent_type: AgentType,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<PaymentAddress>,
    /// Present on semantic results only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl DiscoveredAgent {
    /// Projects a registration into the client-facing discovery shape.
    #[must_use]
    pub fn from_registration(registration: &AgentRegistration, score: Option<f32>) -> Self {
        Self {
            agent_id: registration.metadata.agent_id.clone(),
            organization_id: registration.metadata.organization_id.clone(),
            agent_type: registration.metadata.agent_type,
            capabilities: registration.metadata.capabilities.clone(),
            payment_address: registration.metadata.payment_address.clone(),
            score,
        }
    }
}

/// Attribute filter for agent listings.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub agent_type: Option<AgentType>,
    pub organization_id: Option<OrganizationId>,
    pub interaction_mode: Option<InteractionMode>,
    pub capability: Option<CapabilityName>,
    /// Keep only agents within the liveness window.
    pub active_only: bool,
}

impl AgentFilter {
    /// A filter that matches every registered agent.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    fn matches(&self, registration: &AgentRegistration) -> bool {
        if let Some(agent_type) = self.agent_type {
            if registration.metadata.agent_type != agent_type {
                return false;
            }
        }
        if let Some(organization) = &self.organization_id {
            if registration.metadata.organization_id.as_ref() != Some(organization) {
                return false;
            }
        }
        if let Some(mode) = self.interaction_mode {
            if !registration.metadata.interaction_modes.contains(&mode) {
                return false;
            }
        }
        if let Some(capability) = &self.capability {
            if !registration
                .metadata
                .capabilities
                .iter()
                .any(|advertised| advertised.name == *capability)
            {
                return false;
            }
        }
        true
    }
}

/// Options narrowing a semantic discovery query.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Maximum results returned.
    pub limit: Option<usize>,
    /// Minimum normalized score; the fabric default applies when absent.
    pub min_score: Option<f32>,
    /// Requester to exclude from results.
    pub exclude: Option<AgentId>,
    /// Include agents that have gone quiet past the liveness threshold.
    pub include_inactive: bool,
}

/// The directory of live agents and their capabilities.
pub struct Registry {
    agents: RwLock<HashMap<AgentId, AgentRegistration>>,
    by_organization: RwLock<HashMap<OrganizationId, Vec<AgentId>>>,
    index: CapabilityIndex,
    last_seen: DashMap<AgentId, Instant>,
    liveness_threshold: Duration,
    sink: Arc<dyn ObservabilitySink>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("index", &self.index)
            .field("liveness_threshold", &self.liveness_threshold)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates a registry over the given capability index.
    #[must_use]
    pub fn new(index: CapabilityIndex, liveness_threshold: Duration) -> Self {
        Self::with_sink(index, liveness_threshold, Arc::new(NoopSink))
    }

    /// Creates a registry that reports events to the given sink.
    #[must_use]
    pub fn with_sink(
        index: CapabilityIndex,
        liveness_threshold: Duration,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            by_organization: RwLock::new(HashMap::new()),
            index,
            last_seen: DashMap::new(),
            liveness_threshold,
            sink,
        }
    }

    /// Registers an agent. Fails on a duplicate id or an unverified
    /// identity; the capability index is updated inside the write critical
    /// section so discovery never observes a half-registered agent.
    pub async fn register(&self, registration: AgentRegistration) -> Result<(), RegistryError> {
        let agent_id = registration.agent_id().clone();
        if !registration.identity.is_verified() {
            return Err(RegistryError::UnverifiedIdentity { agent_id });
        }

        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent_id) {
            return Err(RegistryError::DuplicateAgent { agent_id });
        }

        self.index
            .insert_agent(&agent_id, &registration.metadata.capabilities)
            .await?;

        if let Some(org) = &registration.metadata.organization_id {
            let mut by_org = self.by_organization.write().await;
            let members = by_org.entry(org.clone()).or_default();
            if !members.contains(&agent_id) {
                members.push(agent_id.clone());
            }
        }

        agents.insert(agent_id.clone(), registration);
        drop(agents);

        self.last_seen.insert(agent_id.clone(), Instant::now());
        info!(agent_id = %agent_id, "agent registered");
        self.sink.on_event(&FabricEvent::Registered { agent_id });
        Ok(())
    }

    /// Removes an agent and its capability entries. Idempotent: removing an
    /// unknown agent is a no-op.
    pub async fn unregister(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let Some(registration) = agents.remove(agent_id) else {
            debug!(agent_id = %agent_id, "unregister for unknown agent ignored");
            return Ok(());
        };

        self.index
            .remove_agent(agent_id, &registration.metadata.capabilities)
            .await?;

        if let Some(org) = &registration.metadata.organization_id {
            let mut by_org = self.by_organization.write().await;
            let org_empty = by_org.get_mut(org).is_some_and(|members| {
                members.retain(|id| id != agent_id);
                members.is_empty()
            });
            if org_empty {
                by_org.remove(org);
            }
        }
        drop(agents);

        self.last_seen.remove(agent_id);
        info!(agent_id = %agent_id, "agent unregistered");
        self.sink.on_event(&FabricEvent::Unregistered {
            agent_id: agent_id.clone(),
        });
        Ok(())
    }

    /// O(1) registration lookup.
    pub async fn get(&self, agent_id: &AgentId) -> Option<AgentRegistration> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Whether the agent is currently registered.
    pub async fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// Exact capability-name lookup.
    pub async fn get_by_capability(&self, name: &CapabilityName) -> Vec<AgentRegistration> {
        let ids = self.index.find_by_name(name).await;
        let agents = self.agents.read().await;
        ids.iter().filter_map(|id| agents.get(id).cloned()).collect()
    }

    /// Semantic discovery over capability descriptions.
    ///
    /// `default_min_score` is the fabric-wide threshold used when the
    /// options carry none. `barred` lets the hub exclude agents that
    /// recently timed out against the requester.
    pub async fn get_by_capability_description(
        &self,
        query: &str,
        options: &DiscoveryOptions,
        default_min_score: f32,
        default_limit: usize,
        barred: &(dyn Fn(&AgentId) -> bool + Sync),
    ) -> Result<Vec<DiscoveredAgent>, RegistryError> {
        let limit = options.limit.unwrap_or(default_limit);
        let min_score = options.min_score.unwrap_or(default_min_score);
        // Over-fetch: downstream filters may thin the candidate set.
        let fetch = limit.saturating_mul(2).saturating_add(8);
        let scored = self.index.search(query, fetch, min_score).await?;

        let agents = self.agents.read().await;
        let mut results = Vec::new();
        for candidate in scored {
            if results.len() >= limit {
                break;
            }
            if options.exclude.as_ref() == Some(&candidate.agent_id) {
                continue;
            }
            if barred(&candidate.agent_id) {
                continue;
            }
            if !options.include_inactive && !self.is_active_inner(&candidate.agent_id) {
                continue;
            }
            let Some(registration) = agents.get(&candidate.agent_id) else {
                continue;
            };
            results.push(DiscoveredAgent::from_registration(
                registration,
                Some(candidate.score),
            ));
        }
        Ok(results)
    }

    /// All agents registered under one organization.
    pub async fn get_by_organization(&self, organization: &OrganizationId) -> Vec<AgentRegistration> {
        let ids = self
            .by_organization
            .read()
            .await
            .get(organization)
            .cloned()
            .unwrap_or_default();
        let agents = self.agents.read().await;
        ids.iter().filter_map(|id| agents.get(id).cloned()).collect()
    }

    /// All current registrations.
    pub async fn list(&self) -> Vec<AgentRegistration> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Registrations matching an attribute filter.
    pub async fn list_filtered(&self, filter: &AgentFilter) -> Vec<AgentRegistration> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|registration| {
                filter.matches(registration)
                    && (!filter.active_only
                        || self.is_active_inner(registration.agent_id()))
            })
            .cloned()
            .collect()
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Records activity for an agent. The hub calls this on registration
    /// and for every message it successfully routes from the agent.
    pub fn touch(&self, agent_id: &AgentId) {
        if let Some(mut seen) = self.last_seen.get_mut(agent_id) {
            *seen = Instant::now();
        }
    }

    /// Liveness based on the last routed message: an agent is active while
    /// its most recent activity is within the configured threshold.
    pub async fn is_active(&self, agent_id: &AgentId) -> bool {
        self.agents.read().await.contains_key(agent_id) && self.is_active_inner(agent_id)
    }

    fn is_active_inner(&self, agent_id: &AgentId) -> bool {
        self.last_seen
            .get(agent_id)
            .is_some_and(|seen| seen.elapsed() <= self.liveness_threshold)
    }

    /// Persists the capability vector index via the embedding backend.
    pub async fn save_index(&self, path: &Path) -> Result<(), RegistryError> {
        Ok(self.index.persist(path).await?)
    }

    /// Restores the capability vector index via the embedding backend.
    pub async fn load_index(&self, path: &Path) -> Result<(), RegistryError> {
        Ok(self.index.restore(path).await?)
    }
}
