//! Deadline-driven sync state machine.
//!
//! [`SyncEngine`] performs no I/O and reads no clock. The owner feeds it
//! events together with the current instant, calls [`SyncEngine::poll`] to
//! collect the network work that is due, and sleeps until
//! [`SyncEngine::next_deadline`].
//!
//! The push half cycles `Idle → Debouncing → Flushing → {Idle | Backoff}`;
//! the pull half is a single in-flight guard plus a periodic schedule. Every
//! request carries the epoch it was started in, and [`SyncEngine::disable`]
//! bumps the epoch so late responses are discarded.

use std::time::Duration;

use moodsync_shared::constants::PUSH_BATCH_LIMIT;
use moodsync_shared::types::Entry;
use serde::Serialize;
use tokio::time::Instant;

use crate::handshake::HandshakeOutcome;
use crate::queue::{PendingPush, PushQueue};
use crate::signals::RuntimeSignals;
use crate::transport::TransportError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub debounce: Duration,
    pub pull_interval: Duration,
    pub max_pull_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_attempts: u32,
    pub batch_limit: usize,
    pub follow_up_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(800),
            pull_interval: Duration::from_secs(60),
            max_pull_interval: Duration::from_secs(15 * 60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_attempts: 5,
            batch_limit: PUSH_BATCH_LIMIT,
            follow_up_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPhase {
    Idle,
    Debouncing { fire_at: Instant },
    Flushing,
    Backoff { until: Instant },
}

impl PushPhase {
    fn name(&self) -> &'static str {
        match self {
            PushPhase::Idle => "idle",
            PushPhase::Debouncing { .. } => "debouncing",
            PushPhase::Flushing => "flushing",
            PushPhase::Backoff { .. } => "backoff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeState {
    Needed,
    Running,
    Done,
}

/// Work the owner must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Handshake { epoch: u64 },
    Pull { epoch: u64 },
    Push { epoch: u64, entries: Vec<Entry> },
    /// The identity is gone remotely: persist sync as disabled and drop the
    /// cursor.
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub push_phase: &'static str,
    pub pending: usize,
    pub in_flight: usize,
    pub pulling: bool,
    pub pull_interval_secs: u64,
    pub handshake: HandshakeState,
    pub signals: RuntimeSignals,
}

pub struct SyncEngine {
    config: EngineConfig,
    enabled: bool,
    epoch: u64,
    signals: RuntimeSignals,

    queue: PushQueue,
    phase: PushPhase,
    in_flight: Option<Vec<PendingPush>>,
    push_failures: u32,

    pull_in_flight: Option<u64>,
    pull_requested: bool,
    next_pull_at: Option<Instant>,
    follow_up_at: Option<Instant>,
    pull_interval: Duration,

    handshake: HandshakeState,
    /// After a failed handshake, no retry before this instant unless new
    /// activity arrives.
    handshake_hold: Option<Instant>,
    pending_teardown: bool,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        let pull_interval = config.pull_interval;
        Self {
            config,
            enabled: false,
            epoch: 0,
            signals: RuntimeSignals::default(),
            queue: PushQueue::new(),
            phase: PushPhase::Idle,
            in_flight: None,
            push_failures: 0,
            pull_in_flight: None,
            pull_requested: false,
            next_pull_at: None,
            follow_up_at: None,
            pull_interval,
            handshake: HandshakeState::Needed,
            handshake_hold: None,
            pending_teardown: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a response started in `epoch` may still be applied.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.enabled && epoch == self.epoch
    }

    pub fn phase(&self) -> PushPhase {
        self.phase
    }

    pub fn pull_interval(&self) -> Duration {
        self.pull_interval
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.enabled,
            push_phase: self.phase.name(),
            pending: self.queue.len(),
            in_flight: self.in_flight.as_ref().map_or(0, Vec::len),
            pulling: self.pull_in_flight.is_some(),
            pull_interval_secs: self.pull_interval.as_secs(),
            handshake: self.handshake,
            signals: self.signals,
        }
    }

    // ─── Lifecycle ───

    /// Continue a session that was enabled before a restart.
    pub fn resume(&mut self, now: Instant) {
        self.enabled = true;
        self.handshake = HandshakeState::Needed;
        self.handshake_hold = None;
        self.pull_interval = self.config.pull_interval;
        self.pull_requested = true;
        self.next_pull_at = Some(now + self.pull_interval);
    }

    /// Turn sync on and queue every local entry for upload.
    pub fn enable(&mut self, now: Instant, entries: Vec<Entry>) {
        self.resume(now);
        for entry in entries {
            self.queue.replace(entry);
        }
        if !self.queue.is_empty() && self.in_flight.is_none() {
            self.phase = PushPhase::Debouncing { fire_at: now };
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.epoch += 1;
        self.queue.clear();
        self.phase = PushPhase::Idle;
        self.in_flight = None;
        self.push_failures = 0;
        self.pull_in_flight = None;
        self.pull_requested = false;
        self.next_pull_at = None;
        self.follow_up_at = None;
        self.pull_interval = self.config.pull_interval;
        self.handshake = HandshakeState::Needed;
        self.handshake_hold = None;
    }

    fn teardown(&mut self) {
        tracing::warn!("identity missing on server, disabling sync");
        self.disable();
        self.pending_teardown = true;
    }

    // ─── Inputs ───

    /// A local entry changed. Ignored while sync is off.
    pub fn note_edit(&mut self, now: Instant, entry: Entry) {
        if !self.enabled {
            return;
        }
        self.queue.replace(entry);
        self.handshake_hold = None;

        let fire_at = now + self.config.debounce;
        self.phase = match self.phase {
            PushPhase::Idle | PushPhase::Debouncing { .. } => PushPhase::Debouncing { fire_at },
            PushPhase::Backoff { until } => PushPhase::Backoff {
                until: until.max(fire_at),
            },
            PushPhase::Flushing => PushPhase::Flushing,
        };
    }

    /// Ask for a pull as soon as possible. Collapses into a running pull.
    pub fn request_pull(&mut self) {
        if self.enabled {
            self.pull_requested = true;
            self.handshake_hold = None;
        }
    }

    /// Update visibility and connectivity. Becoming able to pull requests
    /// one right away.
    pub fn set_signals(&mut self, signals: RuntimeSignals) {
        let could_pull = self.signals.allows_pull();
        self.signals = signals;
        if !could_pull && signals.allows_pull() {
            self.request_pull();
        }
    }

    // ─── Scheduling ───

    /// Collect the work that is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if std::mem::take(&mut self.pending_teardown) {
            actions.push(Action::Teardown);
        }
        if !self.enabled {
            return actions;
        }

        if !self.signals.allows_pull() {
            // pulls are no-ops until the runtime is visible and online again
            self.consume_pull_triggers(now);
        }
        let pull_due = self.pull_triggered(now);
        let push_due = self.push_due(now);
        if !pull_due && !push_due {
            return actions;
        }

        match self.handshake {
            HandshakeState::Running => return actions,
            HandshakeState::Needed => {
                if self.handshake_hold.is_some_and(|hold| now < hold) {
                    return actions;
                }
                self.handshake = HandshakeState::Running;
                self.handshake_hold = None;
                actions.push(Action::Handshake { epoch: self.epoch });
                return actions;
            }
            HandshakeState::Done => {}
        }

        if pull_due {
            self.consume_pull_triggers(now);
            if self.pull_in_flight.is_none() {
                self.pull_in_flight = Some(self.epoch);
                actions.push(Action::Pull { epoch: self.epoch });
            }
        }

        if push_due {
            let batch = self.queue.drain_batch(self.config.batch_limit);
            let entries = batch.iter().map(|item| item.entry.clone()).collect();
            self.in_flight = Some(batch);
            self.phase = PushPhase::Flushing;
            actions.push(Action::Push {
                epoch: self.epoch,
                entries,
            });
        }

        actions
    }

    /// The next instant at which [`poll`](Self::poll) may produce work, if
    /// any. Completions and commands wake the owner on their own.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.enabled || self.handshake == HandshakeState::Running {
            return None;
        }

        let push = match self.phase {
            PushPhase::Debouncing { fire_at } if !self.queue.is_empty() => Some(fire_at),
            PushPhase::Backoff { until } if !self.queue.is_empty() => Some(until),
            _ => None,
        };
        let earliest = [push, self.next_pull_at, self.follow_up_at]
            .into_iter()
            .flatten()
            .min();

        match (self.handshake, self.handshake_hold) {
            (HandshakeState::Needed, Some(hold)) if self.pull_requested => Some(hold),
            (HandshakeState::Needed, Some(hold)) => earliest.map(|at| at.max(hold)),
            _ => earliest,
        }
    }

    fn pull_triggered(&self, now: Instant) -> bool {
        self.pull_requested
            || self.next_pull_at.is_some_and(|at| at <= now)
            || self.follow_up_at.is_some_and(|at| at <= now)
    }

    fn consume_pull_triggers(&mut self, now: Instant) {
        self.pull_requested = false;
        if self.follow_up_at.is_some_and(|at| at <= now) {
            self.follow_up_at = None;
        }
        if self.next_pull_at.is_some_and(|at| at <= now) {
            self.next_pull_at = Some(now + self.pull_interval);
        }
    }

    fn push_due(&self, now: Instant) -> bool {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return false;
        }
        match self.phase {
            PushPhase::Debouncing { fire_at } => fire_at <= now,
            PushPhase::Backoff { until } => until <= now,
            PushPhase::Idle | PushPhase::Flushing => false,
        }
    }

    fn backoff_delay(&self) -> Duration {
        let exponent = self.push_failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.config
            .backoff_base
            .saturating_mul(factor)
            .min(self.config.backoff_cap)
    }

    /// After a flush finishes, start the next one right away if anything is
    /// left, otherwise go idle.
    fn settle_push_phase(&mut self, now: Instant) {
        self.phase = if self.queue.is_empty() {
            PushPhase::Idle
        } else {
            PushPhase::Debouncing { fire_at: now }
        };
    }

    // ─── Completions ───

    pub fn on_handshake(&mut self, epoch: u64, now: Instant, outcome: &HandshakeOutcome) {
        if !self.is_current(epoch) || self.handshake != HandshakeState::Running {
            return;
        }
        match outcome {
            HandshakeOutcome::Verified { .. } => {
                self.handshake = HandshakeState::Done;
            }
            HandshakeOutcome::Gone => self.teardown(),
            HandshakeOutcome::Failed(reason) => {
                tracing::debug!(%reason, "handshake failed, deferring");
                self.handshake = HandshakeState::Needed;
                self.handshake_hold = Some(now + self.pull_interval);
            }
        }
    }

    pub fn on_pull_result(&mut self, epoch: u64, now: Instant, result: Result<(), &TransportError>) {
        if self.pull_in_flight == Some(epoch) {
            self.pull_in_flight = None;
        }
        if !self.is_current(epoch) {
            return;
        }

        match result {
            Ok(()) => {
                self.pull_interval = self.config.pull_interval;
                self.next_pull_at = Some(now + self.pull_interval);
            }
            Err(TransportError::Gone) => self.teardown(),
            Err(TransportError::RateLimited) => {
                self.pull_interval = self
                    .pull_interval
                    .saturating_mul(2)
                    .min(self.config.max_pull_interval);
                self.next_pull_at = Some(now + self.pull_interval);
                tracing::debug!(
                    interval_secs = self.pull_interval.as_secs(),
                    "pull rate limited, slowing down"
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, "pull failed");
            }
        }
    }

    pub fn on_push_result(&mut self, epoch: u64, now: Instant, result: Result<(), &TransportError>) {
        if !self.is_current(epoch) {
            return;
        }
        let Some(batch) = self.in_flight.take() else {
            return;
        };

        match result {
            Ok(()) => {
                self.push_failures = 0;
                self.follow_up_at = Some(now + self.config.follow_up_delay);
                self.settle_push_phase(now);
            }
            Err(TransportError::Gone) => self.teardown(),
            Err(e) if e.is_retryable() => {
                self.push_failures += 1;
                let dropped = self.queue.requeue_failed(batch, self.config.max_attempts);
                if self.queue.is_empty() {
                    self.phase = PushPhase::Idle;
                } else {
                    let delay = self.backoff_delay();
                    self.phase = PushPhase::Backoff { until: now + delay };
                    tracing::debug!(
                        error = %e,
                        failures = self.push_failures,
                        delay_ms = delay.as_millis() as u64,
                        dropped,
                        "push failed, backing off"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, count = batch.len(), "push rejected, dropping batch");
                self.settle_push_phase(now);
            }
        }
    }
}
