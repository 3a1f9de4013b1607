//! Fabric configuration with environment presets
//!
//! [`FabricConfig`] gathers every tunable of the fabric behind validated
//! domain types. `development()` favors fast feedback, `production()`
//! favors headroom, `testing()` shrinks every window so integration tests
//! run in milliseconds. A builder supports piecemeal overrides.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    InboxCapacity, JanitorIntervalMs, LivenessThresholdMs, MaxTurns, PartnerCooldownMs,
    RequestTimeoutMs, RetentionWindowMs, ScoreThreshold, SearchLimit, ShutdownGraceMs, TokenLimit,
};

/// Configuration validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// Complete fabric configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Bounded capacity of each agent inbox.
    pub inbox_capacity: InboxCapacity,
    /// Default deadline applied by `send_and_wait` callers.
    pub request_timeout: RequestTimeoutMs,
    /// How long late responses stay retrievable after a timeout.
    pub late_retention: RetentionWindowMs,
    /// Interval between janitor sweeps of hub bookkeeping.
    pub janitor_interval: JanitorIntervalMs,
    /// Token budget per agent per minute.
    pub tokens_per_minute: TokenLimit,
    /// Token budget per agent per hour.
    pub tokens_per_hour: TokenLimit,
    /// Turn cap per conversation.
    pub max_turns: MaxTurns,
    /// Fabric-wide default minimum semantic score.
    pub min_semantic_score: ScoreThreshold,
    /// Default result count for semantic discovery.
    pub semantic_search_limit: SearchLimit,
    /// Quiet period after which an agent stops counting as active.
    pub liveness_threshold: LivenessThresholdMs,
    /// How long a timed-out partner stays out of discovery results.
    pub partner_cooldown: PartnerCooldownMs,
    /// Grace period for background workers during shutdown.
    pub shutdown_grace: ShutdownGraceMs,
}

impl FabricConfig {
    /// Development preset: small windows, fast feedback.
    ///
    /// # Panics
    /// Panics if a hardcoded value violates its domain type's range.
    #[must_use]
    pub fn development() -> Self {
        Self {
            inbox_capacity: InboxCapacity::try_new(128).unwrap(),
            request_timeout: RequestTimeoutMs::try_new(10_000).unwrap(),
            late_retention: RetentionWindowMs::try_new(300_000).unwrap(),
            janitor_interval: JanitorIntervalMs::try_new(10_000).unwrap(),
            tokens_per_minute: TokenLimit::try_new(10_000).unwrap(),
            tokens_per_hour: TokenLimit::try_new(100_000).unwrap(),
            max_turns: MaxTurns::try_new(10).unwrap(),
            min_semantic_score: ScoreThreshold::try_new(0.35).unwrap(),
            semantic_search_limit: SearchLimit::try_new(5).unwrap(),
            liveness_threshold: LivenessThresholdMs::try_new(300_000).unwrap(),
            partner_cooldown: PartnerCooldownMs::try_new(120_000).unwrap(),
            shutdown_grace: ShutdownGraceMs::try_new(2_000).unwrap(),
        }
    }

    /// Production preset: generous budgets and retention.
    ///
    /// # Panics
    /// Panics if a hardcoded value violates its domain type's range.
    #[must_use]
    pub fn production() -> Self {
        Self {
            inbox_capacity: InboxCapacity::try_new(1024).unwrap(),
            request_timeout: RequestTimeoutMs::try_new(30_000).unwrap(),
            late_retention: RetentionWindowMs::try_new(900_000).unwrap(),
            janitor_interval: JanitorIntervalMs::try_new(30_000).unwrap(),
            tokens_per_minute: TokenLimit::try_new(60_000).unwrap(),
            tokens_per_hour: TokenLimit::try_new(1_000_000).unwrap(),
            max_turns: MaxTurns::try_new(50).unwrap(),
            min_semantic_score: ScoreThreshold::try_new(0.35).unwrap(),
            semantic_search_limit: SearchLimit::try_new(10).unwrap(),
            liveness_threshold: LivenessThresholdMs::try_new(600_000).unwrap(),
            partner_cooldown: PartnerCooldownMs::try_new(300_000).unwrap(),
            shutdown_grace: ShutdownGraceMs::try_new(5_000).unwrap(),
        }
    }

    /// Testing preset: everything shrunk so tests run in milliseconds.
    ///
    /// # Panics
    /// Panics if a hardcoded value violates its domain type's range.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            inbox_capacity: InboxCapacity::try_new(16).unwrap(),
            request_timeout: RequestTimeoutMs::try_new(500).unwrap(),
            late_retention: RetentionWindowMs::try_new(5_000).unwrap(),
            janitor_interval: JanitorIntervalMs::try_new(50).unwrap(),
            tokens_per_minute: TokenLimit::try_new(1_000).unwrap(),
            tokens_per_hour: TokenLimit::try_new(10_000).unwrap(),
            max_turns: MaxTurns::try_new(5).unwrap(),
            min_semantic_score: ScoreThreshold::try_new(0.05).unwrap(),
            semantic_search_limit: SearchLimit::try_new(5).unwrap(),
            liveness_threshold: LivenessThresholdMs::try_new(60_000).unwrap(),
            partner_cooldown: PartnerCooldownMs::try_new(1_000).unwrap(),
            shutdown_grace: ShutdownGraceMs::try_new(500).unwrap(),
        }
    }

    /// Starts a builder seeded with the development preset.
    #[must_use]
    pub fn builder() -> FabricConfigBuilder {
        FabricConfigBuilder {
            config: Self::development(),
        }
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens_per_hour < self.tokens_per_minute {
            return Err(ConfigError::Validation {
                field: "tokens_per_hour".into(),
                reason: "hourly budget must be at least the per-minute budget".into(),
            });
        }
        if self.janitor_interval.as_duration() > self.late_retention.as_duration() {
            return Err(ConfigError::Validation {
                field: "janitor_interval".into(),
                reason: "janitor must sweep at least once per retention window".into(),
            });
        }
        Ok(())
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for piecemeal configuration overrides.
#[derive(Debug, Clone)]
pub struct FabricConfigBuilder {
    config: FabricConfig,
}

impl FabricConfigBuilder {
    /// Sets the per-agent inbox capacity.
    #[must_use]
    pub fn inbox_capacity(mut self, value: InboxCapacity) -> Self {
        self.config.inbox_capacity = value;
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn request_timeout(mut self, value: RequestTimeoutMs) -> Self {
        self.config.request_timeout = value;
        self
    }

    /// Sets the late-response retention window.
    #[must_use]
    pub fn late_retention(mut self, value: RetentionWindowMs) -> Self {
        self.config.late_retention = value;
        self
    }

    /// Sets the janitor sweep interval.
    #[must_use]
    pub fn janitor_interval(mut self, value: JanitorIntervalMs) -> Self {
        self.config.janitor_interval = value;
        self
    }

    /// Sets the per-minute token budget.
    #[must_use]
    pub fn tokens_per_minute(mut self, value: TokenLimit) -> Self {
        self.config.tokens_per_minute = value;
        self
    }

    /// Sets the per-hour token budget.
    #[must_use]
    pub fn tokens_per_hour(mut self, value: TokenLimit) -> Self {
        self.config.tokens_per_hour = value;
        self
    }

    /// Sets the per-conversation turn cap.
    #[must_use]
    pub fn max_turns(mut self, value: MaxTurns) -> Self {
        self.config.max_turns = value;
        self
    }

    /// Sets the default minimum semantic score.
    #[must_use]
    pub fn min_semantic_score(mut self, value: ScoreThreshold) -> Self {
        self.config.min_semantic_score = value;
        self
    }

    /// Sets the default semantic result count.
    #[must_use]
    pub fn semantic_search_limit(mut self, value: SearchLimit) -> Self {
        self.config.semantic_search_limit = value;
        self
    }

    /// Sets the liveness threshold.
    #[must_use]
    pub fn liveness_threshold(mut self, value: LivenessThresholdMs) -> Self {
        self.config.liveness_threshold = value;
        self
    }

    /// Sets the timeout-partner cooldown.
    #[must_use]
    pub fn partner_cooldown(mut self, value: PartnerCooldownMs) -> Self {
        self.config.partner_cooldown = value;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, value: ShutdownGraceMs) -> Self {
        self.config.shutdown_grace = value;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> Result<FabricConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
