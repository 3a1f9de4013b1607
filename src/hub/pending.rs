//! Pending-request table: correlation, timeouts, late-delivery recovery
//!
//! Every directed `send_and_wait` parks a [`PendingEntry`] here, keyed by
//! request id. The table is a `DashMap`, internally sharded by key hash, so
//! request traffic never contends on one hub-wide lock. Entries reach
//! exactly one terminal status; a janitor sweep evicts terminal records
//! older than the retention window.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::domain_types::{AgentId, RequestId};
use crate::message::Message;

/// Lifecycle status of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Completed,
    TimedOut,
    LateReceived,
    Canceled,
}

impl RequestStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::TimedOut)
    }
}

/// Why a parked waiter was released without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The requester or its target left the fabric.
    AgentUnregistered,
    /// The hub is shutting down.
    HubShutdown,
}

/// Signal delivered to a parked waiter.
#[derive(Debug)]
pub enum WaiterSignal {
    Response(Box<Message>),
    Canceled(CancelReason),
}

/// Result of polling a request after its waiter has returned.
#[derive(Debug)]
pub enum LateResult {
    Pending,
    Completed,
    TimedOut,
    LateReceived(Box<Message>),
    Canceled,
    /// Never seen, or already evicted by the janitor.
    Unknown,
}

/// Outcome of feeding a response into the table.
#[derive(Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The waiter was still parked and received the response.
    Delivered,
    /// The waiter had timed out; the response is retained for polling.
    StoredLate,
    /// No open entry wanted this response.
    Ignored,
}

#[derive(Debug)]
struct PendingEntry {
    requester: AgentId,
    target: AgentId,
    status: RequestStatus,
    response: Option<Message>,
    waiter: Option<oneshot::Sender<WaiterSignal>>,
    settled_at: Option<Instant>,
    deadline: Instant,
}

/// The sharded pending-request table.
pub struct PendingTable {
    entries: DashMap<RequestId, PendingEntry>,
    retention: Duration,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("open", &self.entries.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl PendingTable {
    /// Creates a table retaining settled entries for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Parks a new waiter. Returns the receiver the caller blocks on.
    pub fn insert(
        &self,
        request_id: RequestId,
        requester: AgentId,
        target: AgentId,
        deadline: Instant,
    ) -> oneshot::Receiver<WaiterSignal> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id,
            PendingEntry {
                requester,
                target,
                status: RequestStatus::Pending,
                response: None,
                waiter: Some(tx),
                settled_at: None,
                deadline,
            },
        );
        rx
    }

    /// Feeds a response addressed to `receiver` into the table.
    ///
    /// Delivers to a live waiter, stores late arrivals on timed-out
    /// entries, ignores everything else. The response must be destined for
    /// the requester that parked the entry.
    pub fn complete(&self, request_id: RequestId, response: &Message) -> CompletionOutcome {
        let Some(mut entry) = self.entries.get_mut(&request_id) else {
            return CompletionOutcome::Ignored;
        };
        if entry.requester != response.receiver_id {
            return CompletionOutcome::Ignored;
        }
        match entry.status {
            RequestStatus::Pending => {
                entry.status = RequestStatus::Completed;
                entry.settled_at = Some(Instant::now());
                entry.response = Some(response.clone());
                if let Some(waiter) = entry.waiter.take() {
                    // A dropped receiver is fine: the waiter gave up between
                    // timeout bookkeeping and this delivery.
                    let _ = waiter.send(WaiterSignal::Response(Box::new(response.clone())));
                }
                CompletionOutcome::Delivered
            }
            RequestStatus::TimedOut => {
                entry.status = RequestStatus::LateReceived;
                entry.settled_at = Some(Instant::now());
                entry.response = Some(response.clone());
                trace!(request_id = %request_id, "late response retained");
                CompletionOutcome::StoredLate
            }
            RequestStatus::Completed | RequestStatus::LateReceived | RequestStatus::Canceled => {
                CompletionOutcome::Ignored
            }
        }
    }

    /// Drops an entry outright. Used when routing the request itself
    /// failed, so nothing can ever answer it.
    pub fn discard(&self, request_id: RequestId) {
        self.entries.remove(&request_id);
    }

    /// Marks a request as timed out. The entry stays resident so a late
    /// response can still land in it.
    pub fn mark_timed_out(&self, request_id: RequestId) {
        if let Some(mut entry) = self.entries.get_mut(&request_id) {
            if entry.status == RequestStatus::Pending {
                entry.status = RequestStatus::TimedOut;
                entry.waiter = None;
            }
        }
    }

    /// Cancels every open request an agent participates in, as requester or
    /// target. Returns the number of entries touched.
    pub fn cancel_for_agent(&self, agent_id: &AgentId, reason: CancelReason) -> usize {
        let mut touched = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.status != RequestStatus::Pending {
                continue;
            }
            if entry.requester == *agent_id || entry.target == *agent_id {
                entry.status = RequestStatus::Canceled;
                entry.settled_at = Some(Instant::now());
                if let Some(waiter) = entry.waiter.take() {
                    let _ = waiter.send(WaiterSignal::Canceled(reason));
                }
                touched += 1;
            }
        }
        touched
    }

    /// Cancels every open request. Used on hub shutdown.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let mut touched = 0;
        for mut entry in self.entries.iter_mut() {
            if matches!(entry.status, RequestStatus::Pending | RequestStatus::TimedOut) {
                entry.status = RequestStatus::Canceled;
                entry.settled_at = Some(Instant::now());
                if let Some(waiter) = entry.waiter.take() {
                    let _ = waiter.send(WaiterSignal::Canceled(reason));
                }
                touched += 1;
            }
        }
        touched
    }

    /// Polls a request within the retention window.
    #[must_use]
    pub fn late_result(&self, request_id: RequestId) -> LateResult {
        match self.entries.get(&request_id) {
            None => LateResult::Unknown,
            Some(entry) => match entry.status {
                RequestStatus::Pending => LateResult::Pending,
                RequestStatus::Completed => LateResult::Completed,
                RequestStatus::TimedOut => LateResult::TimedOut,
                RequestStatus::Canceled => LateResult::Canceled,
                RequestStatus::LateReceived => entry
                    .response
                    .clone()
                    .map_or(LateResult::Unknown, |response| {
                        LateResult::LateReceived(Box::new(response))
                    }),
            },
        }
    }

    /// Evicts settled entries older than the retention window and abandoned
    /// timed-out entries past `deadline + retention`. Returns the eviction
    /// count.
    pub fn sweep(&self, now: Instant) -> usize {
        let retention = self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.status.is_terminal() {
                entry
                    .settled_at
                    .is_none_or(|settled| now.duration_since(settled) < retention)
            } else {
                // Pending and timed-out entries linger until well past
                // their deadline so late responses can still land.
                now.saturating_duration_since(entry.deadline) < retention
            }
        });
        before - self.entries.len()
    }

    /// Open (non-terminal) entry count.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }
}
