//! Agent identity: Ed25519 keypairs, signing, verification, DID derivation
//!
//! Every agent owns one [`AgentIdentity`]. The signing half never crosses a
//! serialization boundary; [`AgentIdentity::public_only`] produces the shape
//! that is safe to hand to the registry or to other processes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised by identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity {did} has no signing key")]
    NoSigningCapability { did: Did },

    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    #[error("invalid public key encoding")]
    InvalidPublicKey,
}

/// Decentralized identifier derived from an Ed25519 public key.
///
/// Format: `did:weft:<base58(sha256(public_key)[..20])>`. Stable for a given
/// key; two identities with the same public key share a DID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Did(String);

impl Did {
    const METHOD_PREFIX: &'static str = "did:weft:";

    /// Derives the DID for a public key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let fingerprint = bs58::encode(&digest[..20]).into_string();
        Self(format!("{}{fingerprint}", Self::METHOD_PREFIX))
    }

    /// Borrows the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire form of an identity: public half only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityWire {
    did: Did,
    public_key: String,
    verified: bool,
}

/// An agent's cryptographic identity.
///
/// Holds the verifying key always, the signing key only on the owning side.
/// Serialization goes through [`IdentityWire`], which carries the public half
/// exclusively, so a signing key can never leak across the boundary.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "IdentityWire", try_from = "IdentityWire")]
pub struct AgentIdentity {
    did: Did,
    verifying_key: VerifyingKey,
    signing_key: Option<SigningKey>,
    verified: bool,
}

impl std::fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("did", &self.did)
            .field("can_sign", &self.signing_key.is_some())
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

impl AgentIdentity {
    /// Creates a fresh key-based identity with a newly generated keypair.
    ///
    /// The result is verified by construction: it demonstrably controls its
    /// own signing key.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            did: Did::from_verifying_key(&verifying_key),
            verifying_key,
            signing_key: Some(signing_key),
            verified: true,
        }
    }

    /// Rebuilds an identity from a public key alone. Not verified and unable
    /// to sign; suitable for representing remote peers.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&arr).map_err(|_| IdentityError::InvalidPublicKey)?;
        Ok(Self {
            did: Did::from_verifying_key(&verifying_key),
            verifying_key,
            signing_key: None,
            verified: false,
        })
    }

    /// The identity's DID.
    #[must_use]
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// The public verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Whether this identity has demonstrated control of its signing key.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Whether this side can sign.
    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Signs a payload with the private half.
    pub fn sign(&self, payload: &[u8]) -> Result<Signature, IdentityError> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| IdentityError::NoSigningCapability {
                did: self.did.clone(),
            })?;
        Ok(key.sign(payload))
    }

    /// Verifies a signature over a payload against the public half.
    ///
    /// A malformed or non-matching signature yields `false`, never an error.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.verifying_key.verify(payload, &signature).is_ok()
    }

    /// Returns the public half of this identity, safe to share.
    #[must_use]
    pub fn public_only(&self) -> Self {
        Self {
            did: self.did.clone(),
            verifying_key: self.verifying_key,
            signing_key: None,
            verified: self.verified,
        }
    }

    /// Exports the opaque key material a [`crate::keystore::KeyStore`]
    /// persists. The 32-byte Ed25519 seed; treat as secret.
    pub fn to_key_material(&self) -> Result<Vec<u8>, IdentityError> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| IdentityError::NoSigningCapability {
                did: self.did.clone(),
            })?;
        Ok(key.to_bytes().to_vec())
    }

    /// Restores a signing identity from stored key material.
    pub fn from_key_material(material: &[u8]) -> Result<Self, IdentityError> {
        let seed: [u8; 32] =
            material
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyMaterial {
                    reason: format!("expected 32 bytes, got {}", material.len()),
                })?;
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            did: Did::from_verifying_key(&verifying_key),
            verifying_key,
            signing_key: Some(signing_key),
            verified: true,
        })
    }
}

impl From<AgentIdentity> for IdentityWire {
    fn from(identity: AgentIdentity) -> Self {
        Self {
            did: identity.did,
            public_key: BASE64.encode(identity.verifying_key.as_bytes()),
            verified: identity.verified,
        }
    }
}

impl TryFrom<IdentityWire> for AgentIdentity {
    type Error = IdentityError;

    fn try_from(wire: IdentityWire) -> Result<Self, Self::Error> {
        let bytes = BASE64
            .decode(&wire.public_key)
            .map_err(|_| IdentityError::InvalidPublicKey)?;
        // The wire flag is advisory only: a deserialized identity has not
        // demonstrated control of its key on this side, so it arrives
        // unverified regardless of what the sender claimed. The DID is
        // likewise recomputed from the key rather than trusted.
        Self::from_public_key_bytes(&bytes)
    }
}
