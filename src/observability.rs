//! Observability sink and structured fabric events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentId, RequestId};
use crate::message::Message;

/// Structured events emitted by the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FabricEvent {
    Registered {
        agent_id: AgentId,
    },
    Unregistered {
        agent_id: AgentId,
    },
    BackpressureDropped {
        agent_id: AgentId,
    },
    CooldownStarted {
        agent_id: AgentId,
        until: DateTime<Utc>,
    },
    LateResponse {
        request_id: RequestId,
    },
    HubStopped,
}

/// Sink receiving fabric observations. All methods are best-effort
/// notifications invoked from hot paths; implementations must not block.
pub trait ObservabilitySink: Send + Sync {
    /// A message passed signature verification and was enqueued.
    fn on_routed(&self, _message: &Message) {}

    /// An interceptor returned an error; routing was unaffected.
    fn on_interceptor_error(&self, _error: &str) {}

    /// An agent entered cooldown until the given instant.
    fn on_cooldown(&self, _agent_id: &AgentId, _until: DateTime<Utc>) {}

    /// A response arrived for an already timed-out request.
    fn on_late_response(&self, _request_id: &RequestId) {}

    /// Any other structured event.
    fn on_event(&self, _event: &FabricEvent) {}
}

/// The default sink: observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {}

/// A sink that records everything it sees; for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<FabricEvent>>,
    routed: std::sync::atomic::AtomicU64,
    interceptor_errors: std::sync::atomic::AtomicU64,
}

impl MemorySink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every structured event observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<FabricEvent> {
        self.events.lock().expect("sink events poisoned").clone()
    }

    /// Number of messages observed on the routing path.
    #[must_use]
    pub fn routed_count(&self) -> u64 {
        self.routed.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Number of interceptor failures observed.
    #[must_use]
    pub fn interceptor_error_count(&self) -> u64 {
        self.interceptor_errors
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl ObservabilitySink for MemorySink {
    fn on_routed(&self, _message: &Message) {
        self.routed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_interceptor_error(&self, _error: &str) {
        self.interceptor_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_cooldown(&self, agent_id: &AgentId, until: DateTime<Utc>) {
        self.events
            .lock()
            .expect("sink events poisoned")
            .push(FabricEvent::CooldownStarted {
                agent_id: agent_id.clone(),
                until,
            });
    }

    fn on_late_response(&self, request_id: &RequestId) {
        self.events
            .lock()
            .expect("sink events poisoned")
            .push(FabricEvent::LateResponse {
                request_id: *request_id,
            });
    }

    fn on_event(&self, event: &FabricEvent) {
        self.events
            .lock()
            .expect("sink events poisoned")
            .push(event.clone());
    }
}

/// Installs a global tracing subscriber reading `RUST_LOG`-style filters.
///
/// Embedders call this once at process start; the fabric itself never
/// touches global logging state.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
