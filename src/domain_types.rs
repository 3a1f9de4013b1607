//! Domain types for the weft fabric
//!
//! Strongly-typed domain values used across the crate to prevent primitive
//! obsession: identifiers, capacities, windows, and thresholds all carry
//! their validation rules here.

use nutype::nutype;
use uuid::Uuid;

/// Identifier of an agent within a fabric.
///
/// Agent ids are DID strings for key-based identities, but any non-empty
/// string up to 255 characters is accepted so that external clients
/// (human front-ends, bridges) can participate.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// Reserved id used as the sender of hub-synthesized notices.
    #[must_use]
    pub fn hub() -> Self {
        Self::try_new("hub").expect("reserved hub id is valid")
    }
}

/// Identifier grouping agents under one organization.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct OrganizationId(String);

/// Short stable name of an advertised capability.
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct CapabilityName(String);

/// Opaque settlement address attached to an agent's metadata.
///
/// The fabric stores and surfaces it in discovery results; it never
/// interprets the contents.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct PaymentAddress(String);

/// Wire protocol version carried by every envelope.
#[nutype(
    validate(len_char_min = 1, len_char_max = 16),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = "1.0"
)]
pub struct ProtocolVersion(String);

/// Unique identifier for a message envelope.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Correlation id tying a directed request to its response.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Handle identifying a registered interceptor for later removal.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct InterceptorId(Uuid);

impl InterceptorId {
    /// Creates a new random interceptor id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Key identifying one conversation an agent participates in.
///
/// Derived from the explicit `conversationId` metadata entry when present,
/// otherwise from the peer's agent id.
#[nutype(
    validate(len_char_min = 1, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Builds the key for a peer without an explicit conversation id.
    #[must_use]
    pub fn for_peer(peer: &AgentId) -> Self {
        Self::try_new(peer.to_string()).expect("agent id is a valid conversation key")
    }
}

/// Bounded capacity of a per-agent inbox channel.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 65_536),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 128
)]
pub struct InboxCapacity(usize);

impl InboxCapacity {
    /// Gets the value as usize for use with tokio channels.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Token budget for one rate-limit window.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct TokenLimit(u64);

impl TokenLimit {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Maximum number of turns an agent takes in one conversation.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct MaxTurns(u32);

impl MaxTurns {
    /// Gets the value as u32.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Default deadline for `send_and_wait` in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct RequestTimeoutMs(u64);

impl RequestTimeoutMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Retention window for late-received responses in milliseconds.
#[nutype(
    validate(greater_or_equal = 1_000, less_or_equal = 86_400_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 900_000
)]
pub struct RetentionWindowMs(u64);

impl RetentionWindowMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Interval between janitor sweeps of the pending-request table.
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct JanitorIntervalMs(u64);

impl JanitorIntervalMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Window after the last routed message during which an agent counts as live.
#[nutype(
    validate(greater_or_equal = 1_000, less_or_equal = 86_400_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 300_000
)]
pub struct LivenessThresholdMs(u64);

impl LivenessThresholdMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// How long a timed-out partner stays excluded from discovery results.
#[nutype(
    validate(greater_or_equal = 1_000, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 120_000
)]
pub struct PartnerCooldownMs(u64);

impl PartnerCooldownMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Grace period granted to background workers during shutdown.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5_000
)]
pub struct ShutdownGraceMs(u64);

impl ShutdownGraceMs {
    /// Converts to a Duration.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Minimum normalized similarity score for semantic discovery results.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.35
)]
pub struct ScoreThreshold(f32);

impl ScoreThreshold {
    /// Gets the value as f32.
    #[must_use]
    pub fn as_f32(&self) -> f32 {
        self.into_inner()
    }
}

/// Maximum number of results returned by semantic discovery.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct SearchLimit(usize);

impl SearchLimit {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_rejects_empty_and_oversized() {
        assert!(AgentId::try_new(String::new()).is_err());
        assert!(AgentId::try_new("x".repeat(256)).is_err());
        assert!(AgentId::try_new("did:weft:abc").is_ok());
    }

    #[test]
    fn hub_id_is_stable() {
        assert_eq!(AgentId::hub(), AgentId::hub());
        assert_eq!(AgentId::hub().to_string(), "hub");
    }

    #[test]
    fn defaults_match_fabric_expectations() {
        assert_eq!(InboxCapacity::default().as_usize(), 128);
        assert_eq!(
            RetentionWindowMs::default().as_duration(),
            std::time::Duration::from_secs(900)
        );
        assert_eq!(MaxTurns::default().as_u32(), 10);
        assert!((ScoreThreshold::default().as_f32() - 0.35).abs() < f32::EPSILON);
    }

    #[test]
    fn conversation_key_for_peer_round_trips() {
        let peer = AgentId::try_new("did:weft:peer").unwrap();
        let key = ConversationKey::for_peer(&peer);
        assert_eq!(key.to_string(), "did:weft:peer");
    }

    #[test]
    fn protocol_version_defaults_to_current() {
        assert_eq!(ProtocolVersion::default().to_string(), "1.0");
    }
}
