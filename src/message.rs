//! Message envelope and canonical signing rules
//!
//! The wire format is canonical JSON: camelCase field names, RFC3339 UTC
//! timestamps, SCREAMING_SNAKE_CASE message kinds, base64 signatures.
//!
//! Signing covers the envelope with the `signature` field removed and the
//! `collaborationChain` metadata entry stripped: the chain is routing state
//! owned by the hub (which rewrites it after the sender signed), so the
//! signed surface is exactly the sender-authored content. Canonical bytes
//! are produced by round-tripping through `serde_json::Value`, whose object
//! maps are `BTreeMap`s, giving lexicographically sorted keys at every
//! nesting level.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    AgentId, CapabilityName, ConversationKey, MessageId, PaymentAddress, ProtocolVersion, RequestId,
};
use crate::identity::{AgentIdentity, IdentityError};

/// Errors raised while building or validating envelopes.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message is missing a signature")]
    MissingSignature,

    #[error("message field {field} is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("cannot serialize canonical payload: {source}")]
    Canonicalization {
        #[from]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// The kind of a message, dispatched on by protocols and runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Command,
    Response,
    Error,
    Stop,
    System,
    Ping,
    Cooldown,
    RequestCollaboration,
    ResponseCollaboration,
    CapabilityRequest,
    CapabilityResponse,
}

impl MessageKind {
    /// Kinds that close a pending directed request.
    #[must_use]
    pub fn closes_pending_request(self) -> bool {
        matches!(
            self,
            Self::Response | Self::ResponseCollaboration | Self::Error
        )
    }
}

/// Typed metadata record with known optional fields plus a free-form
/// extension map flattened into the same wire object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Correlation id for directed request/response exchanges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,

    /// Ordered list of agents already on the call stack of this request.
    /// Maintained exclusively by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration_chain: Option<Vec<AgentId>>,

    /// Capability a collaboration request is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityName>,

    /// Settlement address surfaced by responders; opaque to the fabric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_address: Option<PaymentAddress>,

    /// Free-form extension entries.
    #[serde(flatten)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl MessageMetadata {
    /// Metadata carrying only a request id.
    #[must_use]
    pub fn for_request(request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::default()
        }
    }
}

/// A signed inter-agent message.
///
/// Created by a sender, signed, routed by the hub, consumed by a receiver;
/// never mutated — the hub's collaboration-chain bookkeeping produces an
/// annotated copy rather than editing in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: AgentId,
    pub receiver_id: AgentId,
    pub content: String,
    pub message_type: MessageKind,
    pub protocol_version: ProtocolVersion,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Message {
    /// Starts building a message from `sender` to `receiver`.
    #[must_use]
    pub fn builder(sender: AgentId, receiver: AgentId) -> MessageBuilder {
        MessageBuilder::new(sender, receiver)
    }

    /// The canonical byte representation covered by the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        unsigned.metadata.collaboration_chain = None;
        let value = serde_json::to_value(&unsigned)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// Signs the message in place with the sender's identity.
    pub fn sign(&mut self, identity: &AgentIdentity) -> Result<(), MessageError> {
        let payload = self.canonical_bytes()?;
        let signature = identity.sign(&payload)?;
        self.signature = Some(BASE64.encode(signature.to_bytes()));
        Ok(())
    }

    /// Verifies the signature against a public identity.
    ///
    /// Returns `false` for a missing, undecodable, or non-matching
    /// signature; verification failure is a routing decision, not a fault.
    #[must_use]
    pub fn verify(&self, identity: &AgentIdentity) -> bool {
        let Some(encoded) = &self.signature else {
            return false;
        };
        let Ok(signature) = BASE64.decode(encoded) else {
            return false;
        };
        let Ok(payload) = self.canonical_bytes() else {
            return false;
        };
        identity.verify(&payload, &signature)
    }

    /// The conversation this message belongs to from the receiver's point of
    /// view: the explicit `conversationId` metadata entry when present,
    /// otherwise the sending peer.
    #[must_use]
    pub fn conversation_key(&self) -> ConversationKey {
        self.metadata
            .custom
            .get("conversationId")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| ConversationKey::try_new(raw.to_string()).ok())
            .unwrap_or_else(|| ConversationKey::for_peer(&self.sender_id))
    }

    /// Whether this envelope was synthesized by the hub itself.
    #[must_use]
    pub fn is_hub_notice(&self) -> bool {
        self.sender_id == AgentId::hub()
            && self
                .metadata
                .custom
                .get("hubNotice")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    }

    /// Envelope-level validation: applied before any routing decision.
    pub fn validate_envelope(&self) -> Result<(), MessageError> {
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(MessageError::InvalidField {
                field: "content".into(),
                reason: format!("exceeds {MAX_CONTENT_BYTES} bytes"),
            });
        }
        if self.protocol_version != ProtocolVersion::default() {
            return Err(MessageError::InvalidField {
                field: "protocolVersion".into(),
                reason: format!("unsupported version {}", self.protocol_version),
            });
        }
        Ok(())
    }
}

/// Upper bound on content size accepted by the fabric.
pub const MAX_CONTENT_BYTES: usize = 1_048_576;

/// Builder assembling and signing a [`Message`].
#[derive(Debug)]
pub struct MessageBuilder {
    sender_id: AgentId,
    receiver_id: AgentId,
    content: String,
    message_type: MessageKind,
    metadata: MessageMetadata,
}

impl MessageBuilder {
    fn new(sender_id: AgentId, receiver_id: AgentId) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: String::new(),
            message_type: MessageKind::Text,
            metadata: MessageMetadata::default(),
        }
    }

    /// Sets the message content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets the message kind.
    #[must_use]
    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.message_type = kind;
        self
    }

    /// Replaces the metadata record wholesale.
    #[must_use]
    pub fn metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the request correlation id.
    #[must_use]
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.metadata.request_id = Some(request_id);
        self
    }

    /// Names the capability a collaboration request targets.
    #[must_use]
    pub fn capability(mut self, capability: CapabilityName) -> Self {
        self.metadata.capability = Some(capability);
        self
    }

    /// Attaches a settlement address.
    #[must_use]
    pub fn payment_address(mut self, address: PaymentAddress) -> Self {
        self.metadata.payment_address = Some(address);
        self
    }

    /// Adds a free-form metadata entry.
    #[must_use]
    pub fn custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.custom.insert(key.into(), value);
        self
    }

    /// Finalizes and signs the message with the sender's identity.
    pub fn build(self, identity: &AgentIdentity) -> Result<Message, MessageError> {
        let mut message = self.build_unsigned();
        message.sign(identity)?;
        Ok(message)
    }

    /// Finalizes without signing. Used by the hub for its own notices and by
    /// tests exercising rejection paths.
    #[must_use]
    pub fn build_unsigned(self) -> Message {
        Message {
            id: MessageId::generate(),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            message_type: self.message_type,
            protocol_version: ProtocolVersion::default(),
            timestamp: Utc::now(),
            metadata: self.metadata,
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_pair() -> (AgentIdentity, AgentId, AgentId) {
        let identity = AgentIdentity::generate();
        let sender = AgentId::try_new(identity.did().to_string()).unwrap();
        let receiver = AgentId::try_new("did:weft:receiver").unwrap();
        (identity, sender, receiver)
    }

    #[test]
    fn kinds_use_wire_spelling() {
        let json = serde_json::to_string(&MessageKind::RequestCollaboration).unwrap();
        assert_eq!(json, "\"REQUEST_COLLABORATION\"");
        let parsed: MessageKind = serde_json::from_str("\"CAPABILITY_RESPONSE\"").unwrap();
        assert_eq!(parsed, MessageKind::CapabilityResponse);
    }

    #[test]
    fn signed_message_verifies_and_tamper_fails() {
        let (identity, sender, receiver) = sample_pair();
        let message = Message::builder(sender, receiver)
            .content("hi")
            .build(&identity)
            .unwrap();
        assert!(message.verify(&identity));

        let mut tampered = message.clone();
        tampered.content = "hI".into();
        assert!(!tampered.verify(&identity));
    }

    #[test]
    fn collaboration_chain_is_outside_signed_surface() {
        let (identity, sender, receiver) = sample_pair();
        let mut message = Message::builder(sender.clone(), receiver)
            .kind(MessageKind::RequestCollaboration)
            .request_id(RequestId::generate())
            .content("please")
            .build(&identity)
            .unwrap();
        assert!(message.verify(&identity));
        message.metadata.collaboration_chain = Some(vec![sender]);
        assert!(message.verify(&identity), "hub chain append must not break the signature");
    }

    #[test]
    fn canonical_bytes_sort_keys_at_every_level() {
        let (identity, sender, receiver) = sample_pair();
        let message = Message::builder(sender, receiver)
            .custom("zeta", serde_json::json!({"b": 1, "a": 2}))
            .custom("alpha", serde_json::json!(true))
            .build(&identity)
            .unwrap();
        let bytes = message.canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let alpha = text.find("\"alpha\"").unwrap();
        let zeta = text.find("\"zeta\"").unwrap();
        assert!(alpha < zeta);
        let a = text.find("\"a\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        assert!(a < b);
        assert!(!text.contains("signature"));
    }

    #[test]
    fn wire_format_matches_contract() {
        let (identity, sender, receiver) = sample_pair();
        let message = Message::builder(sender, receiver)
            .kind(MessageKind::Text)
            .content("hello")
            .build(&identity)
            .unwrap();
        let value = serde_json::to_value(&message).unwrap();
        for field in [
            "id",
            "senderId",
            "receiverId",
            "content",
            "messageType",
            "protocolVersion",
            "timestamp",
            "metadata",
            "signature",
        ] {
            assert!(value.get(field).is_some(), "missing wire field {field}");
        }
        assert_eq!(value["protocolVersion"], "1.0");
    }

    #[test]
    fn conversation_key_prefers_explicit_id() {
        let (identity, sender, receiver) = sample_pair();
        let message = Message::builder(sender.clone(), receiver)
            .custom("conversationId", serde_json::json!("thread-7"))
            .build(&identity)
            .unwrap();
        assert_eq!(message.conversation_key().to_string(), "thread-7");

        let bare = Message::builder(sender.clone(), AgentId::try_new("b").unwrap())
            .build(&identity)
            .unwrap();
        assert_eq!(bare.conversation_key().to_string(), sender.to_string());
    }

    #[test]
    fn oversized_content_rejected() {
        let (identity, sender, receiver) = sample_pair();
        let message = Message::builder(sender, receiver)
            .content("x".repeat(MAX_CONTENT_BYTES + 1))
            .build(&identity)
            .unwrap();
        assert!(matches!(
            message.validate_envelope(),
            Err(MessageError::InvalidField { .. })
        ));
    }

    proptest! {
        #[test]
        fn sign_verify_round_trip_any_content(content in ".{0,256}") {
            let (identity, sender, receiver) = sample_pair();
            let message = Message::builder(sender, receiver)
                .content(content)
                .build(&identity)
                .unwrap();
            prop_assert!(message.verify(&identity));
        }

        #[test]
        fn resigning_is_deterministic(content in ".{0,128}") {
            let (identity, sender, receiver) = sample_pair();
            let mut message = Message::builder(sender, receiver)
                .content(content)
                .build(&identity)
                .unwrap();
            let first = message.signature.clone();
            message.sign(&identity).unwrap();
            // Ed25519 is deterministic: stripping and re-signing the same
            // canonical payload yields the same bytes.
            prop_assert_eq!(first, message.signature);
        }
    }
}
