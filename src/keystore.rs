//! Key material persistence collaborator
//!
//! The fabric never introspects stored material: it round-trips the opaque
//! bytes produced by [`crate::identity::AgentIdentity::to_key_material`].

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain_types::AgentId;

/// Key store failures.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("no key material stored for {agent_id}")]
    NotFound { agent_id: AgentId },

    #[error("key store I/O failure: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("key store backend failure: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Persistence collaborator for per-agent key material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Stores (or replaces) an agent's key material.
    async fn save(&self, agent_id: &AgentId, material: Vec<u8>) -> Result<(), KeyStoreError>;

    /// Loads an agent's key material.
    async fn load(&self, agent_id: &AgentId) -> Result<Vec<u8>, KeyStoreError>;

    /// Deletes an agent's key material. Idempotent.
    async fn delete(&self, agent_id: &AgentId) -> Result<(), KeyStoreError>;
}

/// In-memory key store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: DashMap<AgentId, Vec<u8>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn save(&self, agent_id: &AgentId, material: Vec<u8>) -> Result<(), KeyStoreError> {
        self.entries.insert(agent_id.clone(), material);
        Ok(())
    }

    async fn load(&self, agent_id: &AgentId) -> Result<Vec<u8>, KeyStoreError> {
        self.entries
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KeyStoreError::NotFound {
                agent_id: agent_id.clone(),
            })
    }

    async fn delete(&self, agent_id: &AgentId) -> Result<(), KeyStoreError> {
        self.entries.remove(agent_id);
        Ok(())
    }
}

/// Directory-backed key store: one file per agent, named by the agent id's
/// fingerprint so arbitrary id strings stay filesystem-safe.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    directory: PathBuf,
}

impl FileKeyStore {
    /// Creates a store rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path_for(&self, agent_id: &AgentId) -> PathBuf {
        let digest = Sha256::digest(agent_id.to_string().as_bytes());
        let name = bs58::encode(&digest[..16]).into_string();
        self.directory.join(format!("{name}.key"))
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn save(&self, agent_id: &AgentId, material: Vec<u8>) -> Result<(), KeyStoreError> {
        Ok(tokio::fs::write(self.path_for(agent_id), material).await?)
    }

    async fn load(&self, agent_id: &AgentId) -> Result<Vec<u8>, KeyStoreError> {
        match tokio::fs::read(self.path_for(agent_id)).await {
            Ok(material) => Ok(material),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(KeyStoreError::NotFound {
                    agent_id: agent_id.clone(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, agent_id: &AgentId) -> Result<(), KeyStoreError> {
        match tokio::fs::remove_file(self.path_for(agent_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
