//! Capability model and the two-mode capability index
//!
//! Exact lookup is a name-to-agents map. Semantic lookup delegates to an
//! [`EmbeddingIndex`] collaborator when one is configured and falls back to
//! lexical scoring otherwise. Embeddings are shared across agents: a
//! capability description is embedded once, keyed by its content hash, and
//! refcounted as agents come and go.

use std::collections::HashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Once;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain_types::{AgentId, CapabilityName};

/// A named, described unit of functionality an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub name: CapabilityName,
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Capability {
    /// Convenience constructor for a capability without schemas.
    pub fn new(name: CapabilityName, description: impl Into<String>) -> Self {
        Self {
            name,
            description: description.into(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            metadata: BTreeMap::new(),
        }
    }
}

/// Content hash identifying one capability description.
///
/// Two agents advertising the same description share one embedding under
/// this key; the index re-embeds only when the text (hence the key) changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptionKey(String);

impl DescriptionKey {
    /// Hashes a description into its key.
    #[must_use]
    pub fn of(description: &str) -> Self {
        let digest = Sha256::digest(description.as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Borrows the key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DescriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by the index and its embedding backend.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding backend failure: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("index persistence failed: {source}")]
    Persistence {
        #[source]
        source: std::io::Error,
    },

    #[error("no embedding backend configured")]
    NoBackend,
}

/// Vector-search collaborator. Implementations own the embedding model and
/// nearest-neighbor store; the fabric only sees keys and raw scores.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Inserts or refreshes the embedding for a description.
    async fn upsert(&self, key: &DescriptionKey, text: &str) -> Result<(), IndexError>;

    /// Drops the embedding for a description.
    async fn remove(&self, key: &DescriptionKey) -> Result<(), IndexError>;

    /// Returns up to `k` nearest descriptions with raw similarity scores
    /// in `[-1, 1]` (cosine convention).
    async fn query(&self, text: &str, k: usize) -> Result<Vec<(DescriptionKey, f32)>, IndexError>;

    /// Persists backend state to disk.
    async fn persist(&self, path: &Path) -> Result<(), IndexError>;

    /// Restores backend state from disk.
    async fn restore(&self, path: &Path) -> Result<(), IndexError>;
}

/// One agent matched by a semantic query, with its normalized score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredAgent {
    pub agent_id: AgentId,
    pub score: f32,
}

#[derive(Debug, Default)]
struct DescriptionEntry {
    text: String,
    holders: Vec<(AgentId, CapabilityName)>,
}

#[derive(Debug, Default)]
struct IndexState {
    by_name: HashMap<CapabilityName, Vec<AgentId>>,
    by_description: HashMap<DescriptionKey, DescriptionEntry>,
    insertion_rank: HashMap<AgentId, u64>,
    next_rank: u64,
}

/// The capability index: exact name lookup plus semantic description search.
pub struct CapabilityIndex {
    state: RwLock<IndexState>,
    embedder: Option<Arc<dyn EmbeddingIndex>>,
    degraded_notice: Once,
}

impl std::fmt::Debug for CapabilityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityIndex")
            .field("has_embedder", &self.embedder.is_some())
            .finish_non_exhaustive()
    }
}

impl CapabilityIndex {
    /// Creates an index backed by the given embedding collaborator, or in
    /// degraded lexical mode when none is supplied.
    #[must_use]
    pub fn new(embedder: Option<Arc<dyn EmbeddingIndex>>) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            embedder,
            degraded_notice: Once::new(),
        }
    }

    /// Indexes an agent's capabilities. Embeddings are upserted only for
    /// descriptions the index has not seen before.
    pub async fn insert_agent(
        &self,
        agent_id: &AgentId,
        capabilities: &[Capability],
    ) -> Result<(), IndexError> {
        let mut fresh_descriptions = Vec::new();
        {
            let mut state = self.state.write().await;
            if !state.insertion_rank.contains_key(agent_id) {
                let rank = state.next_rank;
                state.next_rank += 1;
                state.insertion_rank.insert(agent_id.clone(), rank);
            }
            for capability in capabilities {
                let agents = state.by_name.entry(capability.name.clone()).or_default();
                if !agents.contains(agent_id) {
                    agents.push(agent_id.clone());
                }

                let key = DescriptionKey::of(&capability.description);
                let entry = state.by_description.entry(key.clone()).or_default();
                if entry.holders.is_empty() {
                    entry.text = capability.description.clone();
                    fresh_descriptions.push((key, capability.description.clone()));
                }
                let holder = (agent_id.clone(), capability.name.clone());
                if !entry.holders.contains(&holder) {
                    entry.holders.push(holder);
                }
            }
        }
        if let Some(embedder) = &self.embedder {
            for (key, text) in fresh_descriptions {
                embedder.upsert(&key, &text).await?;
            }
        }
        Ok(())
    }

    /// Removes an agent's capability entries, dropping shared embeddings
    /// once their last holder is gone. Idempotent.
    pub async fn remove_agent(
        &self,
        agent_id: &AgentId,
        capabilities: &[Capability],
    ) -> Result<(), IndexError> {
        let mut orphaned_keys = Vec::new();
        {
            let mut state = self.state.write().await;
            state.insertion_rank.remove(agent_id);
            for capability in capabilities {
                let name_empty = state.by_name.get_mut(&capability.name).is_some_and(|agents| {
                    agents.retain(|id| id != agent_id);
                    agents.is_empty()
                });
                if name_empty {
                    state.by_name.remove(&capability.name);
                }

                let key = DescriptionKey::of(&capability.description);
                let description_empty =
                    state.by_description.get_mut(&key).is_some_and(|entry| {
                        entry
                            .holders
                            .retain(|(id, name)| !(id == agent_id && *name == capability.name));
                        entry.holders.is_empty()
                    });
                if description_empty {
                    state.by_description.remove(&key);
                    orphaned_keys.push(key);
                }
            }
        }
        if let Some(embedder) = &self.embedder {
            for key in orphaned_keys {
                embedder.remove(&key).await?;
            }
        }
        Ok(())
    }

    /// Exact-name lookup. Agents are returned in registration order.
    pub async fn find_by_name(&self, name: &CapabilityName) -> Vec<AgentId> {
        self.state
            .read()
            .await
            .by_name
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Semantic description search. Scores are normalized to `[0, 1]`,
    /// results sorted descending, ties broken by agent registration order.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredAgent>, IndexError> {
        let per_agent = if let Some(embedder) = &self.embedder {
            // Over-fetch keys: several descriptions can map to one agent.
            let k = limit.saturating_mul(4).max(limit);
            let raw = embedder.query(query, k).await?;
            let state = self.state.read().await;
            let mut best: HashMap<AgentId, f32> = HashMap::new();
            for (key, raw_score) in raw {
                let Some(entry) = state.by_description.get(&key) else {
                    continue;
                };
                let score = normalize_similarity(raw_score);
                for (agent_id, _) in &entry.holders {
                    let slot = best.entry(agent_id.clone()).or_insert(0.0);
                    if score > *slot {
                        *slot = score;
                    }
                }
            }
            self.ranked(best, &state.insertion_rank)
        } else {
            self.degraded_notice.call_once(|| {
                warn!(
                    "no embedding backend configured; semantic capability search \
                     is running in degraded lexical mode"
                );
            });
            let state = self.state.read().await;
            let mut best: HashMap<AgentId, f32> = HashMap::new();
            for entry in state.by_description.values() {
                let score = lexical_score(query, &entry.text);
                for (agent_id, _) in &entry.holders {
                    let slot = best.entry(agent_id.clone()).or_insert(0.0);
                    if score > *slot {
                        *slot = score;
                    }
                }
            }
            self.ranked(best, &state.insertion_rank)
        };

        Ok(per_agent
            .into_iter()
            .filter(|scored| scored.score >= min_score)
            .take(limit)
            .collect())
    }

    fn ranked(
        &self,
        best: HashMap<AgentId, f32>,
        insertion_rank: &HashMap<AgentId, u64>,
    ) -> Vec<ScoredAgent> {
        let mut scored: Vec<(u64, ScoredAgent)> = best
            .into_iter()
            .map(|(agent_id, score)| {
                let rank = insertion_rank.get(&agent_id).copied().unwrap_or(u64::MAX);
                (rank, ScoredAgent { agent_id, score })
            })
            .collect();
        scored.sort_by(|(rank_a, a), (rank_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rank_a.cmp(rank_b))
        });
        scored.into_iter().map(|(_, agent)| agent).collect()
    }

    /// Persists the embedding backend's state. A no-op without a backend.
    pub async fn persist(&self, path: &Path) -> Result<(), IndexError> {
        match &self.embedder {
            Some(embedder) => embedder.persist(path).await,
            None => {
                debug!("persist requested with no embedding backend; nothing to do");
                Ok(())
            }
        }
    }

    /// Restores the embedding backend's state. A no-op without a backend.
    pub async fn restore(&self, path: &Path) -> Result<(), IndexError> {
        match &self.embedder {
            Some(embedder) => embedder.restore(path).await,
            None => {
                debug!("restore requested with no embedding backend; nothing to do");
                Ok(())
            }
        }
    }
}

/// Maps a raw cosine similarity in `[-1, 1]` onto `[0, 1]`.
#[must_use]
pub fn normalize_similarity(raw: f32) -> f32 {
    ((raw + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Degraded-mode relevance: token overlap weighted with substring
/// containment, normalized to `[0, 1]`.
#[must_use]
pub fn lexical_score(query: &str, description: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let description_lower = description.to_lowercase();
    let query_tokens: Vec<&str> = tokenize(&query_lower);
    let description_tokens: Vec<&str> = tokenize(&description_lower);
    if query_tokens.is_empty() || description_tokens.is_empty() {
        return 0.0;
    }

    let matched = query_tokens
        .iter()
        .filter(|token| description_tokens.contains(token))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let overlap = matched as f32 / query_tokens.len() as f32;

    let contained = query_tokens
        .iter()
        .filter(|token| token.len() >= 4 && description_lower.contains(**token))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let substring = if description_lower.contains(query_lower.trim()) {
        1.0
    } else {
        contained as f32 / query_tokens.len() as f32
    };

    (0.7 * overlap + 0.3 * substring).clamp(0.0, 1.0)
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}
