//! Protocol state machines layered on the message envelope
//!
//! [`SimplePeerProtocol`] formats and validates arbitrary peer-to-peer
//! traffic; [`CollaborationProtocol`] adds the correlation rules for
//! capability-addressed request/response collaborations.

use thiserror::Error;

use crate::domain_types::{AgentId, CapabilityName, RequestId};
use crate::identity::AgentIdentity;
use crate::message::{Message, MessageBuilder, MessageError, MessageKind};

/// Protocol-level validation failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message {0} is unsigned")]
    Unsigned(crate::domain_types::MessageId),

    #[error("collaboration request is missing a request id")]
    MissingRequestId,

    #[error("collaboration request is missing a capability name")]
    MissingCapability,

    #[error("collaboration response does not echo request id {expected}")]
    RequestIdMismatch { expected: RequestId },

    #[error("unexpected message type {got:?}, expected one of {expected:?}")]
    UnexpectedKind {
        got: MessageKind,
        expected: &'static [MessageKind],
    },

    #[error(transparent)]
    Envelope(#[from] MessageError),
}

/// Formats and validates plain peer-to-peer messages.
///
/// Stateless; validation checks the envelope and the presence of a
/// signature. Signature *correctness* is the hub's concern, since only the
/// hub holds the registered public identity of the sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePeerProtocol;

impl SimplePeerProtocol {
    /// Builds and signs a plain text message.
    pub fn format_text(
        identity: &AgentIdentity,
        sender: AgentId,
        receiver: AgentId,
        content: impl Into<String>,
    ) -> Result<Message, MessageError> {
        Message::builder(sender, receiver)
            .kind(MessageKind::Text)
            .content(content)
            .build(identity)
    }

    /// Validates an arbitrary peer message: envelope rules plus signature
    /// presence.
    pub fn validate(message: &Message) -> Result<(), ProtocolError> {
        message.validate_envelope()?;
        if message.signature.is_none() && !message.is_hub_notice() {
            return Err(ProtocolError::Unsigned(message.id));
        }
        Ok(())
    }
}

/// Enforces the collaboration request/response contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollaborationProtocol;

impl CollaborationProtocol {
    /// Builds and signs a collaboration request addressed to a capability.
    pub fn format_request(
        identity: &AgentIdentity,
        sender: AgentId,
        receiver: AgentId,
        capability: CapabilityName,
        content: impl Into<String>,
    ) -> Result<Message, MessageError> {
        Message::builder(sender, receiver)
            .kind(MessageKind::RequestCollaboration)
            .request_id(RequestId::generate())
            .capability(capability)
            .content(content)
            .build(identity)
    }

    /// Builds and signs the response to a collaboration request, echoing its
    /// request id.
    pub fn format_response(
        identity: &AgentIdentity,
        request: &Message,
        content: impl Into<String>,
    ) -> Result<Message, ProtocolError> {
        let request_id = request
            .metadata
            .request_id
            .ok_or(ProtocolError::MissingRequestId)?;
        let builder: MessageBuilder =
            Message::builder(request.receiver_id.clone(), request.sender_id.clone())
                .kind(MessageKind::ResponseCollaboration)
                .request_id(request_id)
                .content(content);
        Ok(builder.build(identity)?)
    }

    /// Validates a collaboration request: peer rules plus a request id and a
    /// capability name.
    pub fn validate_request(message: &Message) -> Result<(), ProtocolError> {
        SimplePeerProtocol::validate(message)?;
        if message.message_type != MessageKind::RequestCollaboration {
            return Err(ProtocolError::UnexpectedKind {
                got: message.message_type,
                expected: &[MessageKind::RequestCollaboration],
            });
        }
        if message.metadata.request_id.is_none() {
            return Err(ProtocolError::MissingRequestId);
        }
        if message.metadata.capability.is_none() {
            return Err(ProtocolError::MissingCapability);
        }
        Ok(())
    }

    /// Validates that a response echoes the request it answers.
    pub fn validate_response(response: &Message, request_id: RequestId) -> Result<(), ProtocolError> {
        SimplePeerProtocol::validate(response)?;
        if !matches!(
            response.message_type,
            MessageKind::ResponseCollaboration | MessageKind::Error
        ) {
            return Err(ProtocolError::UnexpectedKind {
                got: response.message_type,
                expected: &[MessageKind::ResponseCollaboration, MessageKind::Error],
            });
        }
        if response.metadata.request_id != Some(request_id) {
            return Err(ProtocolError::RequestIdMismatch {
                expected: request_id,
            });
        }
        Ok(())
    }
}
