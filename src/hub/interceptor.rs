//! Message interceptors: read-only observers of routed traffic
//!
//! Interceptors see messages after they pass authentication, off the
//! routing critical path: the hub hands each routed message to a dispatcher
//! task which fans it out to global observers and observers scoped to the
//! message's receiver. Interceptor errors are logged and reported to the
//! observability sink, never propagated into routing.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain_types::{AgentId, InterceptorId};
use crate::message::Message;
use crate::observability::ObservabilitySink;

/// A read-only observer of routed messages.
///
/// Implementations must treat the message as advisory: invocation order
/// relative to inbox delivery is unspecified. Returning an error is
/// reported but does not affect routing; implementations must not panic.
pub trait Interceptor: Send + Sync {
    fn observe(&self, message: &Message) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> Interceptor for F
where
    F: Fn(&Message) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn observe(&self, message: &Message) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self(message)
    }
}

type Registered = (InterceptorId, Arc<dyn Interceptor>);

/// Registry of global and per-agent interceptors.
#[derive(Default)]
pub struct InterceptorSet {
    global: RwLock<Vec<Registered>>,
    scoped: DashMap<AgentId, Vec<Registered>>,
}

impl std::fmt::Debug for InterceptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorSet")
            .field("scoped_agents", &self.scoped.len())
            .finish_non_exhaustive()
    }
}

impl InterceptorSet {
    /// Registers a global interceptor; every routed message is observed.
    pub async fn add_global(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        let id = InterceptorId::generate();
        self.global.write().await.push((id, interceptor));
        id
    }

    /// Registers an interceptor scoped to one agent's inbound traffic.
    pub fn add_for_agent(&self, agent_id: AgentId, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        let id = InterceptorId::generate();
        self.scoped.entry(agent_id).or_default().push((id, interceptor));
        id
    }

    /// Removes an interceptor by handle, wherever it was registered.
    pub async fn remove(&self, id: InterceptorId) -> bool {
        {
            let mut global = self.global.write().await;
            let before = global.len();
            global.retain(|(registered, _)| *registered != id);
            if global.len() != before {
                return true;
            }
        }
        let mut removed = false;
        self.scoped.retain(|_, interceptors| {
            let before = interceptors.len();
            interceptors.retain(|(registered, _)| *registered != id);
            removed |= interceptors.len() != before;
            !interceptors.is_empty()
        });
        removed
    }

    /// Fans one message out to every applicable interceptor.
    pub async fn dispatch(&self, message: &Message, sink: &dyn ObservabilitySink) {
        let observers: Vec<Arc<dyn Interceptor>> = {
            let global = self.global.read().await;
            let mut all: Vec<Arc<dyn Interceptor>> =
                global.iter().map(|(_, interceptor)| Arc::clone(interceptor)).collect();
            if let Some(scoped) = self.scoped.get(&message.receiver_id) {
                all.extend(scoped.iter().map(|(_, interceptor)| Arc::clone(interceptor)));
            }
            all
        };

        for observer in observers {
            if let Err(error) = observer.observe(message) {
                warn!(message_id = %message.id, %error, "interceptor failed");
                sink.on_interceptor_error(&error.to_string());
            }
        }
    }
}
