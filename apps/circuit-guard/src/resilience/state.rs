//! Per-service circuit state and the transition rules that mutate it.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       consecutive failures >= failure_threshold
//! OPEN → HALF_OPEN    timeout elapsed, observed by an admission check
//! HALF_OPEN → CLOSED  probe succeeded
//! HALF_OPEN → OPEN    probe failed (timeout restarts)
//! ```
//!
//! Everything here is pure: callers pass in the current [`Timestamp`] and get
//! back the transitions that happened. Locking and notification live in
//! [`super::circuit_breaker`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls fail fast.
    Open,
    /// Circuit is letting probe calls through to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Numeric value exported on the `circuit_breaker_state` gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }

    /// Lowercase label used in metric labels.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// A change of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    /// State before the change.
    pub from: CircuitState,
    /// State after the change.
    pub to: CircuitState,
}

impl Transition {
    /// Whether this transition appears in the state machine at all.
    ///
    /// `CLOSED → HALF_OPEN` and `OPEN → CLOSED` are never produced.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(
            (self.from, self.to),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed | CircuitState::Open)
        )
    }
}

/// Result of an admission check on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// `true` when the caller must fail fast.
    pub open: bool,
    /// Transition performed by the check, if any.
    pub transition: Option<Transition>,
}

impl Admission {
    const fn allowed() -> Self {
        Self {
            open: false,
            transition: None,
        }
    }

    const fn rejected() -> Self {
        Self {
            open: true,
            transition: None,
        }
    }
}

/// State tracked for a single service.
#[derive(Debug, Clone)]
pub struct CircuitStateEntry {
    state: CircuitState,
    state_changed_at: Timestamp,
    opened_at: Option<Timestamp>,
    consecutive_failure_count: u32,
    probes_admitted: u32,
    last_probe_at: Option<Timestamp>,
    version: u64,
}

impl CircuitStateEntry {
    /// A fresh `CLOSED` entry with no failures.
    #[must_use]
    pub const fn new(now: Timestamp) -> Self {
        Self {
            state: CircuitState::Closed,
            state_changed_at: now,
            opened_at: None,
            consecutive_failure_count: 0,
            probes_admitted: 0,
            last_probe_at: None,
            version: 0,
        }
    }

    /// Monotonic counter bumped by every recorded outcome and every
    /// transition. Probe admissions do not bump it.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// When the current state was entered.
    #[must_use]
    pub const fn state_changed_at(&self) -> Timestamp {
        self.state_changed_at
    }

    /// When the circuit last opened, while it is `OPEN` or `HALF_OPEN`.
    #[must_use]
    pub const fn opened_at(&self) -> Option<Timestamp> {
        self.opened_at
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.consecutive_failure_count
    }

    /// Record a failed call.
    ///
    /// While `OPEN` the count still grows but the timeout window is untouched.
    pub fn record_failure(&mut self, failure_threshold: u32, now: Timestamp) -> Option<Transition> {
        self.version += 1;
        self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);

        match self.state {
            CircuitState::Closed if self.consecutive_failure_count >= failure_threshold => {
                Some(self.transition_to(CircuitState::Open, now))
            }
            CircuitState::HalfOpen => Some(self.transition_to(CircuitState::Open, now)),
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    /// Record a successful call. Success always closes the circuit.
    ///
    /// A success reported while `OPEN` counts as an implicit probe, so it
    /// passes through `HALF_OPEN` and yields two transitions.
    pub fn record_success(&mut self, now: Timestamp) -> Vec<Transition> {
        self.version += 1;
        let mut transitions = Vec::new();

        if self.state == CircuitState::Open {
            transitions.push(self.transition_to(CircuitState::HalfOpen, now));
        }

        if self.state == CircuitState::HalfOpen {
            transitions.push(self.transition_to(CircuitState::Closed, now));
        } else {
            self.consecutive_failure_count = 0;
            self.state_changed_at = now;
        }

        transitions
    }

    /// Decide whether a caller must fail fast, healing `OPEN → HALF_OPEN`
    /// once `timeout` has elapsed.
    ///
    /// With `max_probes` set, at most that many callers are admitted per
    /// half-open window. Admissions reset when no outcome arrives within
    /// `timeout` of the last admitted probe.
    pub fn check(
        &mut self,
        timeout: Duration,
        max_probes: Option<u32>,
        now: Timestamp,
    ) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::allowed(),
            CircuitState::Open => {
                if now.saturating_since(self.state_changed_at) < timeout {
                    return Admission::rejected();
                }
                let transition = self.transition_to(CircuitState::HalfOpen, now);
                self.admit_probe(now);
                Admission {
                    open: false,
                    transition: Some(transition),
                }
            }
            CircuitState::HalfOpen => {
                let Some(limit) = max_probes else {
                    self.admit_probe(now);
                    return Admission::allowed();
                };

                if self.probes_admitted < limit {
                    self.admit_probe(now);
                    return Admission::allowed();
                }

                let stale = self
                    .last_probe_at
                    .is_none_or(|at| now.saturating_since(at) >= timeout);
                if stale {
                    self.probes_admitted = 0;
                    self.admit_probe(now);
                    Admission::allowed()
                } else {
                    Admission::rejected()
                }
            }
        }
    }

    /// Time left before an `OPEN` circuit becomes eligible for half-open.
    ///
    /// `None` unless the circuit is `OPEN`.
    #[must_use]
    pub fn time_until_half_open(&self, timeout: Duration, now: Timestamp) -> Option<Duration> {
        (self.state == CircuitState::Open)
            .then(|| timeout.saturating_sub(now.saturating_since(self.state_changed_at)))
    }

    fn admit_probe(&mut self, now: Timestamp) {
        self.probes_admitted = self.probes_admitted.saturating_add(1);
        self.last_probe_at = Some(now);
    }

    fn transition_to(&mut self, to: CircuitState, now: Timestamp) -> Transition {
        let transition = Transition {
            from: self.state,
            to,
        };
        debug_assert!(transition.is_valid(), "invalid transition {transition:?}");

        self.version += 1;
        self.state = to;
        self.state_changed_at = now;
        self.probes_admitted = 0;
        self.last_probe_at = None;

        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failure_count = 0;
            }
            CircuitState::HalfOpen => {}
        }

        transition
    }
}
