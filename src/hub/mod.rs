//! The communication hub: authentication, routing, correlation
//!
//! Every inter-agent message flows through [`Hub::route`]. The hub never
//! synthesizes conversational content; it authenticates senders against
//! their registered identities, enforces collaboration-chain acyclicity,
//! delivers into bounded per-agent inboxes, fans messages out to
//! interceptors on a dedicated dispatcher task, and correlates directed
//! requests with their responses in the pending-request table.

pub mod interceptor;
pub mod pending;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FabricConfig;
use crate::domain_types::{AgentId, CapabilityName, RequestId};
use crate::message::{Message, MessageError, MessageKind};
use crate::observability::{FabricEvent, ObservabilitySink};
use crate::registry::{
    AgentFilter, AgentRegistration, DiscoveredAgent, DiscoveryOptions, Registry, RegistryError,
};

pub use interceptor::{Interceptor, InterceptorSet};
pub use pending::{CancelReason, CompletionOutcome, LateResult, PendingTable, WaiterSignal};

/// Hub operation failures.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("signature verification failed for sender {agent_id}")]
    AuthenticationFailure { agent_id: AgentId },

    #[error("receiver {agent_id} is not registered")]
    UnknownReceiver { agent_id: AgentId },

    #[error("inbox of {agent_id} is full")]
    Backpressure { agent_id: AgentId },

    #[error("collaboration request would loop back to {agent_id}")]
    CollaborationLoop { agent_id: AgentId },

    #[error("directed request carries no request id")]
    MissingRequestId,

    #[error("agent {agent_id} is shutting down")]
    AgentUnavailable { agent_id: AgentId },

    #[error("hub is shutting down")]
    HubShutdown,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Envelope(#[from] MessageError),
}

impl HubError {
    /// Short machine-readable tag embedded in hub ERROR notices.
    #[must_use]
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure { .. } => "AUTHENTICATION_FAILURE",
            Self::UnknownReceiver { .. } => "UNKNOWN_RECEIVER",
            Self::Backpressure { .. } => "BACKPRESSURE",
            Self::CollaborationLoop { .. } => "COLLABORATION_LOOP",
            Self::MissingRequestId => "MISSING_REQUEST_ID",
            Self::AgentUnavailable { .. } => "AGENT_UNAVAILABLE",
            Self::HubShutdown => "HUB_SHUTDOWN",
            Self::Registry(_) => "REGISTRY",
            Self::Envelope(_) => "ENVELOPE",
        }
    }
}

/// Outcome of a completed `send_and_wait`.
#[derive(Debug)]
pub enum SendOutcome {
    /// The response arrived within the deadline.
    Completed {
        request_id: RequestId,
        response: Box<Message>,
    },
    /// The deadline elapsed. Poll [`HubClient::check_late_result`] with the
    /// request id to recover a late response.
    TimedOut { request_id: RequestId },
}

/// The hub surface agents hold. Breaking the hub/agent reference cycle:
/// runtimes own an `Arc<dyn HubClient>`, never the hub's internals.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Routes one message; returns once the message is enqueued.
    async fn route(&self, message: Message) -> Result<(), HubError>;

    /// Routes a directed request and blocks until a response, the timeout,
    /// or hub shutdown.
    async fn send_and_wait(
        &self,
        message: Message,
        timeout: std::time::Duration,
    ) -> Result<SendOutcome, HubError>;

    /// Polls a request after timeout, within the retention window.
    async fn check_late_result(&self, request_id: RequestId) -> LateResult;

    /// Exact capability discovery.
    async fn find_by_capability(&self, name: &CapabilityName) -> Vec<DiscoveredAgent>;

    /// Semantic capability discovery, filtered for the requester.
    async fn find_by_capability_description(
        &self,
        query: &str,
        requester: Option<&AgentId>,
        options: DiscoveryOptions,
    ) -> Result<Vec<DiscoveredAgent>, HubError>;

    /// All registered agents in discovery shape.
    async fn list_agents(&self) -> Vec<DiscoveredAgent>;
}

/// A point-in-time snapshot of hub activity counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStats {
    pub registered_agents: usize,
    pub messages_routed: u64,
    pub routing_errors: u64,
    pub backpressure_drops: u64,
    pub open_requests: usize,
    pub late_responses: u64,
}

/// Inbox wiring returned to a freshly registered agent.
#[derive(Debug)]
pub struct AgentMailbox {
    /// The registered agent id.
    pub agent_id: AgentId,
    /// Receive side of the bounded inbox; the hub keeps the send side.
    pub inbox: mpsc::Receiver<Message>,
    /// Cancellation token tied to the hub's lifetime. Cancelled on
    /// unregister and on hub stop.
    pub token: CancellationToken,
}

#[derive(Debug)]
struct InboxSlot {
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
}

/// The in-process routing fabric.
pub struct Hub {
    config: FabricConfig,
    registry: Arc<Registry>,
    inboxes: DashMap<AgentId, InboxSlot>,
    pending: Arc<PendingTable>,
    interceptors: Arc<InterceptorSet>,
    intercept_tx: mpsc::UnboundedSender<Message>,
    intercept_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    timeout_partners: DashMap<(AgentId, AgentId), Instant>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    sink: Arc<dyn ObservabilitySink>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    messages_routed: AtomicU64,
    routing_errors: AtomicU64,
    backpressure_drops: AtomicU64,
    late_responses: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("agents", &self.inboxes.len())
            .field("pending", &self.pending)
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Creates a hub over a registry. Call [`Hub::start`] to spawn the
    /// background workers.
    #[must_use]
    pub fn new(
        config: FabricConfig,
        registry: Arc<Registry>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Arc<Self> {
        let (intercept_tx, intercept_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            pending: Arc::new(PendingTable::new(config.late_retention.as_duration())),
            config,
            registry,
            inboxes: DashMap::new(),
            interceptors: Arc::new(InterceptorSet::default()),
            intercept_tx,
            intercept_rx: Mutex::new(Some(intercept_rx)),
            timeout_partners: DashMap::new(),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            sink,
            workers: Mutex::new(Vec::new()),
            messages_routed: AtomicU64::new(0),
            routing_errors: AtomicU64::new(0),
            backpressure_drops: AtomicU64::new(0),
            late_responses: AtomicU64::new(0),
        })
    }

    /// Spawns the interceptor dispatcher and the pending-request janitor.
    /// Idempotent: a second call does nothing.
    pub async fn start(self: &Arc<Self>) {
        let Some(mut intercept_rx) = self.intercept_rx.lock().await.take() else {
            return;
        };

        let mut workers = self.workers.lock().await;

        let dispatcher = {
            let hub = Arc::clone(self);
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        received = intercept_rx.recv() => match received {
                            Some(message) => {
                                hub.interceptors.dispatch(&message, hub.sink.as_ref()).await;
                            }
                            None => break,
                        },
                    }
                }
                debug!("interceptor dispatcher stopped");
            })
        };
        workers.push(dispatcher);

        let janitor = {
            let hub = Arc::clone(self);
            let token = self.shutdown.clone();
            let interval = self.config.janitor_interval.as_duration();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let now = Instant::now();
                            let evicted = hub.pending.sweep(now);
                            if evicted > 0 {
                                debug!(evicted, "janitor evicted settled requests");
                            }
                            hub.timeout_partners.retain(|_, expiry| *expiry > now);
                        }
                    }
                }
                debug!("pending-request janitor stopped");
            })
        };
        workers.push(janitor);

        info!("hub started");
    }

    /// Registers an agent and wires its inbox.
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<AgentMailbox, HubError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(HubError::HubShutdown);
        }
        let agent_id = registration.agent_id().clone();
        self.registry.register(registration).await?;

        let (tx, rx) = mpsc::channel(self.config.inbox_capacity.as_usize());
        let token = self.shutdown.child_token();
        self.inboxes.insert(
            agent_id.clone(),
            InboxSlot {
                tx,
                token: token.clone(),
            },
        );
        Ok(AgentMailbox {
            agent_id,
            inbox: rx,
            token,
        })
    }

    /// Unregisters an agent: stops its runtime, cancels its pending
    /// requests, removes it from the registry. Idempotent.
    pub async fn unregister_agent(&self, agent_id: &AgentId) -> Result<(), HubError> {
        if let Some((_, slot)) = self.inboxes.remove(agent_id) {
            slot.token.cancel();
        }
        let canceled = self
            .pending
            .cancel_for_agent(agent_id, CancelReason::AgentUnregistered);
        if canceled > 0 {
            debug!(agent_id = %agent_id, canceled, "canceled pending requests");
        }
        self.timeout_partners
            .retain(|(requester, target), _| requester != agent_id && target != agent_id);
        self.registry.unregister(agent_id).await?;
        Ok(())
    }

    /// Registers a global interceptor.
    pub async fn add_global_interceptor(&self, interceptor: Arc<dyn Interceptor>) -> crate::domain_types::InterceptorId {
        self.interceptors.add_global(interceptor).await
    }

    /// Registers an interceptor scoped to one agent's inbound traffic.
    pub fn add_agent_interceptor(
        &self,
        agent_id: AgentId,
        interceptor: Arc<dyn Interceptor>,
    ) -> crate::domain_types::InterceptorId {
        self.interceptors.add_for_agent(agent_id, interceptor)
    }

    /// Removes an interceptor by handle.
    pub async fn remove_interceptor(&self, id: crate::domain_types::InterceptorId) -> bool {
        self.interceptors.remove(id).await
    }

    /// Whether a candidate recently timed out against the requester.
    fn is_barred(&self, requester: &AgentId, candidate: &AgentId) -> bool {
        self.timeout_partners
            .get(&(requester.clone(), candidate.clone()))
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Builds and delivers an unsigned hub ERROR notice straight into an
    /// agent's inbox, bypassing authentication. Best effort.
    fn notify_error(&self, recipient: &AgentId, error: &HubError, request_id: Option<RequestId>) {
        let Some(slot) = self.inboxes.get(recipient) else {
            return;
        };
        let mut builder = Message::builder(AgentId::hub(), recipient.clone())
            .kind(MessageKind::Error)
            .content(error.to_string())
            .custom("hubNotice", serde_json::Value::Bool(true))
            .custom(
                "errorKind",
                serde_json::Value::String(error.kind_tag().to_string()),
            );
        if let Some(request_id) = request_id {
            builder = builder.request_id(request_id);
        }
        let notice = builder.build_unsigned();
        if slot.tx.try_send(notice).is_err() {
            debug!(recipient = %recipient, "dropping hub notice: inbox unavailable");
        }
    }

    async fn verify_sender(&self, message: &Message) -> Result<(), HubError> {
        let sender = self
            .registry
            .get(&message.sender_id)
            .await
            .ok_or_else(|| HubError::AuthenticationFailure {
                agent_id: message.sender_id.clone(),
            })?;
        if message.signature.is_none() || !message.verify(&sender.identity) {
            return Err(HubError::AuthenticationFailure {
                agent_id: message.sender_id.clone(),
            });
        }
        Ok(())
    }

    fn deliver(&self, message: Message) -> Result<(), HubError> {
        let receiver_id = message.receiver_id.clone();
        let Some(slot) = self.inboxes.get(&receiver_id) else {
            return Err(HubError::UnknownReceiver {
                agent_id: receiver_id,
            });
        };
        match slot.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(receiver = %receiver_id, "inbox full, applying backpressure");
                self.sink.on_event(&FabricEvent::BackpressureDropped {
                    agent_id: receiver_id.clone(),
                });
                Err(HubError::Backpressure {
                    agent_id: receiver_id,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::AgentUnavailable {
                agent_id: receiver_id,
            }),
        }
    }

    async fn route_inner(&self, message: Message) -> Result<(), HubError> {
        let outcome = self.route_pipeline(message).await;
        match &outcome {
            Ok(()) => {
                self.messages_routed.fetch_add(1, Ordering::Relaxed);
            }
            Err(HubError::Backpressure { .. }) => {
                self.routing_errors.fetch_add(1, Ordering::Relaxed);
                self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.routing_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    async fn route_pipeline(&self, mut message: Message) -> Result<(), HubError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(HubError::HubShutdown);
        }
        message.validate_envelope()?;

        // 1. Receiver must be registered.
        if !self.registry.contains(&message.receiver_id).await {
            let error = HubError::UnknownReceiver {
                agent_id: message.receiver_id.clone(),
            };
            self.notify_error(&message.sender_id, &error, message.metadata.request_id);
            return Err(error);
        }

        // 2. Authenticate the sender. Hub notices are delivered straight to
        //    inboxes and never travel through route, so a routed message
        //    claiming the reserved hub id is a forgery.
        if message.sender_id == AgentId::hub() {
            return Err(HubError::AuthenticationFailure {
                agent_id: message.sender_id,
            });
        }
        if let Err(error) = self.verify_sender(&message).await {
            self.notify_error(&message.sender_id, &error, message.metadata.request_id);
            return Err(error);
        }

        // 3. Collaboration-chain bookkeeping. The hub alone appends; a
        //    request that would revisit a chain member is rejected.
        if message.message_type == MessageKind::RequestCollaboration {
            let mut chain = message.metadata.collaboration_chain.take().unwrap_or_default();
            if chain.contains(&message.receiver_id) {
                let error = HubError::CollaborationLoop {
                    agent_id: message.receiver_id.clone(),
                };
                self.notify_error(&message.sender_id, &error, message.metadata.request_id);
                return Err(error);
            }
            if !chain.contains(&message.sender_id) {
                chain.push(message.sender_id.clone());
            }
            message.metadata.collaboration_chain = Some(chain);
        }

        let sender_id = message.sender_id.clone();
        let request_id = message.metadata.request_id;
        let closes_pending = message.message_type.closes_pending_request();
        let routed = message.clone();

        // 4. Enqueue into the receiver's bounded inbox.
        self.deliver(message)?;

        self.registry.touch(&sender_id);
        self.sink.on_routed(&routed);

        // 5. Hand off to the interceptor dispatcher; never blocks routing.
        if self.intercept_tx.send(routed.clone()).is_err() {
            debug!("interceptor dispatcher gone; observation skipped");
        }

        // 6/7. Close or late-fill a matching pending request.
        if closes_pending {
            if let Some(request_id) = request_id {
                match self.pending.complete(request_id, &routed) {
                    CompletionOutcome::StoredLate => {
                        self.late_responses.fetch_add(1, Ordering::Relaxed);
                        self.sink.on_late_response(&request_id);
                        self.sink
                            .on_event(&FabricEvent::LateResponse { request_id });
                    }
                    CompletionOutcome::Delivered | CompletionOutcome::Ignored => {}
                }
            }
        }
        Ok(())
    }

    /// Stops the hub: refuses new work, cancels pending waits and agent
    /// runtimes, then joins background workers within the grace period.
    pub async fn stop(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("hub stopping");

        let canceled = self.pending.cancel_all(CancelReason::HubShutdown);
        if canceled > 0 {
            debug!(canceled, "canceled pending requests on shutdown");
        }

        // Cancels every agent runtime token derived from the hub token.
        self.shutdown.cancel();
        self.inboxes.clear();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let grace = self.config.shutdown_grace.as_duration();
        if tokio::time::timeout(grace, join_all(workers)).await.is_err() {
            warn!("hub workers did not stop within the grace period");
        }
        self.sink.on_event(&FabricEvent::HubStopped);
        info!("hub stopped");
    }

    /// The registry backing this hub.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The fabric configuration in force.
    #[must_use]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Whether the hub still accepts registrations and traffic.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// A snapshot of the hub's activity counters.
    pub async fn stats(&self) -> HubStats {
        HubStats {
            registered_agents: self.registry.len().await,
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            open_requests: self.pending.open_count(),
            late_responses: self.late_responses.load(Ordering::Relaxed),
        }
    }

    /// Registered agents matching an attribute filter, in discovery shape.
    pub async fn find_agents(&self, filter: &AgentFilter) -> Vec<DiscoveredAgent> {
        self.registry
            .list_filtered(filter)
            .await
            .iter()
            .map(|registration| DiscoveredAgent::from_registration(registration, None))
            .collect()
    }
}

#[async_trait]
impl HubClient for Hub {
    async fn route(&self, message: Message) -> Result<(), HubError> {
        self.route_inner(message).await
    }

    async fn send_and_wait(
        &self,
        message: Message,
        timeout: std::time::Duration,
    ) -> Result<SendOutcome, HubError> {
        let request_id = message.metadata.request_id.ok_or(HubError::MissingRequestId)?;
        let requester = message.sender_id.clone();
        let target = message.receiver_id.clone();
        let deadline = Instant::now() + timeout;

        let waiter = self
            .pending
            .insert(request_id, requester.clone(), target.clone(), deadline);

        if let Err(error) = self.route_inner(message).await {
            self.pending.discard(request_id);
            return Err(error);
        }

        tokio::select! {
            () = self.shutdown.cancelled() => Err(HubError::HubShutdown),
            waited = tokio::time::timeout(timeout, waiter) => match waited {
                Ok(Ok(WaiterSignal::Response(response))) => Ok(SendOutcome::Completed {
                    request_id,
                    response,
                }),
                Ok(Ok(WaiterSignal::Canceled(CancelReason::HubShutdown))) => {
                    Err(HubError::HubShutdown)
                }
                Ok(Ok(WaiterSignal::Canceled(CancelReason::AgentUnregistered))) => {
                    Err(HubError::AgentUnavailable { agent_id: target })
                }
                Ok(Err(_)) => {
                    // Sender half vanished: the janitor evicted the entry.
                    Err(HubError::HubShutdown)
                }
                Err(_elapsed) => {
                    self.pending.mark_timed_out(request_id);
                    self.timeout_partners.insert(
                        (requester, target),
                        Instant::now() + self.config.partner_cooldown.as_duration(),
                    );
                    Ok(SendOutcome::TimedOut { request_id })
                }
            }
        }
    }

    async fn check_late_result(&self, request_id: RequestId) -> LateResult {
        self.pending.late_result(request_id)
    }

    async fn find_by_capability(&self, name: &CapabilityName) -> Vec<DiscoveredAgent> {
        self.registry
            .get_by_capability(name)
            .await
            .iter()
            .map(|registration| DiscoveredAgent::from_registration(registration, None))
            .collect()
    }

    async fn find_by_capability_description(
        &self,
        query: &str,
        requester: Option<&AgentId>,
        mut options: DiscoveryOptions,
    ) -> Result<Vec<DiscoveredAgent>, HubError> {
        if options.exclude.is_none() {
            options.exclude = requester.cloned();
        }
        let barred = |candidate: &AgentId| {
            requester.is_some_and(|requester| self.is_barred(requester, candidate))
        };
        Ok(self
            .registry
            .get_by_capability_description(
                query,
                &options,
                self.config.min_semantic_score.as_f32(),
                self.config.semantic_search_limit.as_usize(),
                &barred,
            )
            .await?)
    }

    async fn list_agents(&self) -> Vec<DiscoveredAgent> {
        self.registry
            .list()
            .await
            .iter()
            .map(|registration| DiscoveredAgent::from_registration(registration, None))
            .collect()
    }
}
