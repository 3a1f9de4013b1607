//! Top-level error taxonomy
//!
//! Component modules define their own error enums; [`FabricError`] unifies
//! them at the crate boundary. Recoverable conditions travel back to agents
//! as ERROR-typed messages; only identity bootstrap and hub initialization
//! failures are fatal.

use thiserror::Error;

use crate::capability::IndexError;
use crate::config::ConfigError;
use crate::hub::HubError;
use crate::identity::IdentityError;
use crate::keystore::KeyStoreError;
use crate::message::MessageError;
use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::runtime::EngineError;

/// Any failure the fabric can surface to an embedder.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
