//! Interaction control: rate limits, cooldown, turn accounting
//!
//! Each agent runtime owns one [`InteractionControl`]. Two fixed-window
//! token buckets (per minute, per hour) absorb reasoning-engine token usage;
//! overflowing either puts the agent into cooldown until the earliest
//! offending window resets. Turn counters cap how long a single
//! conversation can run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain_types::{AgentId, ConversationKey, MaxTurns, TokenLimit};

/// Decision returned by the controller before and after each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing.
    Continue,
    /// Rate limit crossed: hold off until the given instant.
    Wait { until: Instant },
    /// The conversation has exhausted its turn budget.
    Stop,
}

/// Listener invoked when a cooldown starts.
pub type CooldownListener = Arc<dyn Fn(&AgentId, DateTime<Utc>) + Send + Sync>;

#[derive(Debug)]
struct TokenBucket {
    limit: u64,
    window: Duration,
    used: u64,
    window_start: Instant,
}

impl TokenBucket {
    fn new(limit: TokenLimit, window: Duration) -> Self {
        Self {
            limit: limit.as_u64(),
            window,
            used: 0,
            window_start: Instant::now(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.window {
            self.used = 0;
            self.window_start = now;
        }
    }

    /// Adds usage; returns true when the bucket overflowed.
    fn add(&mut self, now: Instant, tokens: u64) -> bool {
        self.roll(now);
        self.used = self.used.saturating_add(tokens);
        self.used > self.limit
    }

    fn resets_at(&self) -> Instant {
        self.window_start + self.window
    }
}

#[derive(Debug)]
struct ControlState {
    minute: TokenBucket,
    hour: TokenBucket,
    cooldown_until: Option<Instant>,
    turns: HashMap<ConversationKey, u32>,
}

/// Per-agent rate and interaction controller.
pub struct InteractionControl {
    agent_id: AgentId,
    max_turns: u32,
    state: Mutex<ControlState>,
    listeners: Mutex<Vec<CooldownListener>>,
}

impl std::fmt::Debug for InteractionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionControl")
            .field("agent_id", &self.agent_id)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

impl InteractionControl {
    /// Creates a controller with the given minute/hour budgets and turn cap.
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        tokens_per_minute: TokenLimit,
        tokens_per_hour: TokenLimit,
        max_turns: MaxTurns,
    ) -> Self {
        Self {
            agent_id,
            max_turns: max_turns.as_u32(),
            state: Mutex::new(ControlState {
                minute: TokenBucket::new(tokens_per_minute, Duration::from_secs(60)),
                hour: TokenBucket::new(tokens_per_hour, Duration::from_secs(3600)),
                cooldown_until: None,
                turns: HashMap::new(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener fired whenever a cooldown starts.
    pub fn add_cooldown_listener(&self, listener: CooldownListener) {
        self.listeners.lock().expect("listeners poisoned").push(listener);
    }

    /// Checks whether a new turn may start for the given conversation.
    #[must_use]
    pub fn precheck(&self, conversation: &ConversationKey) -> Verdict {
        let now = Instant::now();
        let mut state = self.state.lock().expect("control state poisoned");
        if let Some(until) = state.cooldown_until {
            if now < until {
                return Verdict::Wait { until };
            }
            state.cooldown_until = None;
        }
        if state.turns.get(conversation).copied().unwrap_or(0) >= self.max_turns {
            return Verdict::Stop;
        }
        Verdict::Continue
    }

    /// Accounts token usage for a completed turn and advances the
    /// conversation's turn counter.
    ///
    /// Returns `Wait` when a bucket overflowed, `Continue` otherwise. The
    /// turn cap is enforced by [`InteractionControl::precheck`] before the
    /// next turn starts.
    pub fn account(&self, tokens: u64, conversation: &ConversationKey) -> Verdict {
        let now = Instant::now();
        let (verdict, cooldown_started) = {
            let mut state = self.state.lock().expect("control state poisoned");

            let turn_count = state.turns.entry(conversation.clone()).or_insert(0);
            *turn_count += 1;

            let minute_overflow = state.minute.add(now, tokens);
            let hour_overflow = state.hour.add(now, tokens);

            if minute_overflow || hour_overflow {
                let until = match (minute_overflow, hour_overflow) {
                    (true, true) => state.minute.resets_at().min(state.hour.resets_at()),
                    (true, false) => state.minute.resets_at(),
                    (false, true) => state.hour.resets_at(),
                    (false, false) => unreachable!(),
                };
                state.cooldown_until = Some(until);
                (Verdict::Wait { until }, Some(until))
            } else {
                (Verdict::Continue, None)
            }
        };

        if let Some(until) = cooldown_started {
            debug!(agent_id = %self.agent_id, "cooldown started");
            let wall = Utc::now()
                + chrono::Duration::from_std(until.saturating_duration_since(now))
                    .unwrap_or_else(|_| chrono::Duration::zero());
            let listeners = self.listeners.lock().expect("listeners poisoned").clone();
            for listener in listeners {
                listener(&self.agent_id, wall);
            }
        }
        verdict
    }

    /// Forgets a conversation's turn counter (STOP handling).
    pub fn close_conversation(&self, conversation: &ConversationKey) {
        self.state
            .lock()
            .expect("control state poisoned")
            .turns
            .remove(conversation);
    }

    /// Turns taken so far in a conversation.
    #[must_use]
    pub fn turns(&self, conversation: &ConversationKey) -> u32 {
        self.state
            .lock()
            .expect("control state poisoned")
            .turns
            .get(conversation)
            .copied()
            .unwrap_or(0)
    }

    /// The instant the current cooldown expires, if one is active.
    #[must_use]
    pub fn cooldown_until(&self) -> Option<Instant> {
        let state = self.state.lock().expect("control state poisoned");
        state.cooldown_until.filter(|until| Instant::now() < *until)
    }

    /// A cloneable recorder suitable for wiring into arbitrary LLM client
    /// callbacks: call it with the token usage of each completed turn.
    #[must_use]
    pub fn usage_recorder(
        self: &Arc<Self>,
        conversation: ConversationKey,
    ) -> Arc<dyn Fn(u64) -> Verdict + Send + Sync> {
        let control = Arc::clone(self);
        Arc::new(move |tokens| control.account(tokens, &conversation))
    }
}
