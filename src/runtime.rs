//! Per-agent runtime: the cooperative processing loop
//!
//! Each spawned agent owns one runtime task that pulls from its bounded
//! inbox, consults interaction control, and defers content to a pluggable
//! [`ReasoningEngine`]. PING, STOP, COOLDOWN, and CAPABILITY_REQUEST
//! messages are handled by the loop itself and never reach the engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capability::Capability;
use crate::control::{InteractionControl, Verdict};
use crate::domain_types::{AgentId, PaymentAddress};
use crate::hub::{AgentMailbox, HubClient, HubError};
use crate::identity::AgentIdentity;
use crate::message::{Message, MessageKind, MessageMetadata};

/// Failure raised by a reasoning engine while handling a message.
#[derive(Debug, Error)]
#[error("reasoning engine failure: {reason}")]
pub struct EngineError {
    pub reason: String,
}

impl EngineError {
    /// Creates an engine error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// An unsigned reply produced by a reasoning engine.
///
/// The runtime envelopes and signs it: engines never touch key material.
#[derive(Debug, Clone, Default)]
pub struct ReplyDraft {
    pub content: String,
    /// Explicit kind; when absent the runtime picks RESPONSE, or
    /// RESPONSE_COLLABORATION for collaboration requests.
    pub kind: Option<MessageKind>,
    pub metadata: MessageMetadata,
}

impl ReplyDraft {
    /// A plain response draft.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// The reasoning collaborator driving an agent's behavior.
///
/// Stateless with respect to the hub; whatever memory it keeps is its own
/// concern. `handle` may block for a long time and must tolerate being
/// dropped mid-flight when the agent stops.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Handles one inbound message, optionally producing a reply draft.
    async fn handle(&self, message: &Message) -> Result<Option<ReplyDraft>, EngineError>;

    /// Token usage of the most recent `handle` call, fed to rate control.
    fn last_token_usage(&self) -> u64;

    /// Releases engine resources on agent stop.
    async fn shutdown(&self) {}
}

/// Handle to a spawned agent runtime.
#[derive(Debug)]
pub struct AgentHandle {
    agent_id: AgentId,
    token: CancellationToken,
    join: JoinHandle<()>,
    control: Arc<InteractionControl>,
}

impl AgentHandle {
    /// The agent this handle controls.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The agent's interaction controller, e.g. for wiring cooldown
    /// listeners or LLM usage callbacks.
    #[must_use]
    pub fn control(&self) -> &Arc<InteractionControl> {
        &self.control
    }

    /// Requests a graceful stop and waits for the loop to drain.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(join_error) = self.join.await {
            if !join_error.is_cancelled() {
                error!(agent_id = %self.agent_id, %join_error, "agent task aborted");
            }
        }
    }

    /// Whether the runtime task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Everything a runtime needs to act on behalf of one agent.
pub struct AgentRuntime {
    agent_id: AgentId,
    identity: AgentIdentity,
    capabilities: Vec<Capability>,
    payment_address: Option<PaymentAddress>,
    hub: Arc<dyn HubClient>,
    engine: Arc<dyn ReasoningEngine>,
    control: Arc<InteractionControl>,
    peer_cooldowns: HashMap<AgentId, Instant>,
}

const BACKPRESSURE_RETRIES: u32 = 3;
const BACKPRESSURE_BASE_DELAY: Duration = Duration::from_millis(50);

impl AgentRuntime {
    /// Spawns the runtime loop over a registered mailbox.
    #[must_use]
    pub fn spawn(
        mailbox: AgentMailbox,
        identity: AgentIdentity,
        capabilities: Vec<Capability>,
        payment_address: Option<PaymentAddress>,
        hub: Arc<dyn HubClient>,
        engine: Arc<dyn ReasoningEngine>,
        control: Arc<InteractionControl>,
    ) -> AgentHandle {
        let AgentMailbox {
            agent_id,
            inbox,
            token,
        } = mailbox;
        let runtime = Self {
            agent_id: agent_id.clone(),
            identity,
            capabilities,
            payment_address,
            hub,
            engine,
            control: Arc::clone(&control),
            peer_cooldowns: HashMap::new(),
        };
        let loop_token = token.clone();
        let join = tokio::spawn(runtime.run(inbox, loop_token));
        AgentHandle {
            agent_id,
            token,
            join,
            control,
        }
    }

    async fn run(mut self, mut inbox: tokio::sync::mpsc::Receiver<Message>, token: CancellationToken) {
        info!(agent_id = %self.agent_id, "agent runtime started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                received = inbox.recv() => match received {
                    Some(message) => self.process(message, &token).await,
                    None => break,
                },
            }
        }
        self.drain(&mut inbox).await;
        self.engine.shutdown().await;
        info!(agent_id = %self.agent_id, "agent runtime stopped");
    }

    async fn process(&mut self, message: Message, token: &CancellationToken) {
        match message.message_type {
            MessageKind::Stop => {
                debug!(agent_id = %self.agent_id, "conversation stopped by peer");
                self.control.close_conversation(&message.conversation_key());
            }
            MessageKind::Ping => {
                let reply = Message::builder(self.agent_id.clone(), message.sender_id.clone())
                    .kind(MessageKind::Ping)
                    .content("pong")
                    .metadata(reply_metadata(&message));
                self.send(reply).await;
            }
            MessageKind::CapabilityRequest => {
                let listing = serde_json::to_string(&self.capabilities).unwrap_or_default();
                let reply = Message::builder(self.agent_id.clone(), message.sender_id.clone())
                    .kind(MessageKind::CapabilityResponse)
                    .content(listing)
                    .metadata(reply_metadata(&message));
                self.send(reply).await;
            }
            MessageKind::Cooldown => {
                let until = Instant::now() + Duration::from_secs(30);
                self.peer_cooldowns.insert(message.sender_id.clone(), until);
                debug!(agent_id = %self.agent_id, peer = %message.sender_id, "peer reported cooldown");
            }
            MessageKind::Error if message.is_hub_notice() => {
                warn!(agent_id = %self.agent_id, content = %message.content, "hub error notice");
            }
            _ => self.process_turn(message, token).await,
        }
    }

    async fn process_turn(&mut self, message: Message, token: &CancellationToken) {
        let conversation = message.conversation_key();
        match self.control.precheck(&conversation) {
            Verdict::Wait { until } => {
                // Never drop input silently: tell the sender we are
                // cooling down, then hold the loop until the window opens.
                if message.sender_id != AgentId::hub() {
                    let notice =
                        Message::builder(self.agent_id.clone(), message.sender_id.clone())
                            .kind(MessageKind::Cooldown)
                            .content("rate limited, retry later")
                            .metadata(reply_metadata(&message));
                    self.send(notice).await;
                }
                let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(until));
                tokio::select! {
                    () = token.cancelled() => {}
                    () = sleep => {}
                }
                return;
            }
            Verdict::Stop => {
                let stop = Message::builder(self.agent_id.clone(), message.sender_id.clone())
                    .kind(MessageKind::Stop)
                    .content("conversation turn budget exhausted")
                    .metadata(reply_metadata(&message));
                self.send(stop).await;
                self.control.close_conversation(&conversation);
                return;
            }
            Verdict::Continue => {}
        }

        // The engine may block arbitrarily long; agent stop must win.
        let handled = tokio::select! {
            () = token.cancelled() => return,
            handled = self.engine.handle(&message) => handled,
        };
        match handled {
            Ok(Some(draft)) => {
                let reply = self.envelope_reply(&message, draft);
                self.send(reply).await;
            }
            Ok(None) => {}
            Err(engine_error) => {
                warn!(agent_id = %self.agent_id, %engine_error, "engine failed; replying with error");
                let reply = Message::builder(self.agent_id.clone(), message.sender_id.clone())
                    .kind(MessageKind::Error)
                    .content(engine_error.to_string())
                    .metadata(reply_metadata(&message));
                self.send(reply).await;
            }
        }

        let usage = self.engine.last_token_usage();
        if let Verdict::Wait { .. } = self.control.account(usage, &conversation) {
            debug!(agent_id = %self.agent_id, "entered cooldown after turn");
        }
    }

    fn envelope_reply(&self, inbound: &Message, draft: ReplyDraft) -> crate::message::MessageBuilder {
        let kind = draft.kind.unwrap_or(match inbound.message_type {
            MessageKind::RequestCollaboration => MessageKind::ResponseCollaboration,
            _ => MessageKind::Response,
        });
        let mut metadata = draft.metadata;
        if metadata.request_id.is_none() {
            metadata.request_id = inbound.metadata.request_id;
        }
        if metadata.payment_address.is_none()
            && matches!(
                kind,
                MessageKind::Response | MessageKind::ResponseCollaboration
            )
        {
            metadata.payment_address = self.payment_address.clone();
        }
        Message::builder(self.agent_id.clone(), inbound.sender_id.clone())
            .kind(kind)
            .content(draft.content)
            .metadata(metadata)
    }

    /// Signs and routes an outbound message, retrying briefly on
    /// backpressure with exponential backoff.
    async fn send(&self, builder: crate::message::MessageBuilder) {
        let message = match builder.build(&self.identity) {
            Ok(message) => message,
            Err(build_error) => {
                error!(agent_id = %self.agent_id, %build_error, "cannot sign outbound message");
                return;
            }
        };

        let mut delay = BACKPRESSURE_BASE_DELAY;
        for attempt in 0..=BACKPRESSURE_RETRIES {
            match self.hub.route(message.clone()).await {
                Ok(()) => return,
                Err(HubError::Backpressure { .. }) if attempt < BACKPRESSURE_RETRIES => {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(route_error) => {
                    debug!(agent_id = %self.agent_id, %route_error, "outbound message dropped");
                    return;
                }
            }
        }
    }

    /// Empties the inbox on shutdown, telling every waiting sender the
    /// agent is gone.
    async fn drain(&self, inbox: &mut tokio::sync::mpsc::Receiver<Message>) {
        while let Ok(message) = inbox.try_recv() {
            if message.is_hub_notice() || message.message_type == MessageKind::Stop {
                continue;
            }
            let reply = Message::builder(self.agent_id.clone(), message.sender_id.clone())
                .kind(MessageKind::Error)
                .content("agent shutting down")
                .metadata(reply_metadata(&message));
            if let Ok(reply) = reply.build(&self.identity) {
                let _ = self.hub.route(reply).await;
            }
        }
    }
}

/// Metadata for a direct reply: echoes the request id and conversation id.
fn reply_metadata(inbound: &Message) -> MessageMetadata {
    let mut metadata = MessageMetadata::default();
    metadata.request_id = inbound.metadata.request_id;
    if let Some(conversation) = inbound.metadata.custom.get("conversationId") {
        metadata
            .custom
            .insert("conversationId".to_string(), conversation.clone());
    }
    metadata
}
