//! Escalating lockout policy for brute-force protection
//!
//! The policy is a pure state machine: [`LockoutPolicy::apply`] takes the
//! current [`LockoutState`] and one [`LockoutEvent`] and returns the next
//! state plus what happened. It owns no clock and no timer, so every
//! transition can be tested by handing it explicit instants.
//!
//! With the default configuration:
//!
//! - Phase 1: 5 wrong PINs before lockout
//! - Phase 2 and later: 3 wrong PINs before lockout
//! - Every lockout lasts 3 minutes
//! - The second lockout in a session raises the help flag for good

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Attempt budget while in phase 1
pub const DEFAULT_INITIAL_ATTEMPTS: u32 = 5;
/// Attempt budget once a session has been locked at least once
pub const DEFAULT_ESCALATED_ATTEMPTS: u32 = 3;
/// Lockout length, identical for every phase
pub const DEFAULT_LOCKOUT_DURATION_MS: u64 = 180_000;
/// Highest phase the counter reaches
pub const DEFAULT_MAX_PHASE: u32 = 2;
/// Lockouts after which help guidance is surfaced
pub const DEFAULT_HELP_AFTER_LOCKOUTS: u32 = 2;

/// Tunable constants of the lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Wrong PINs allowed in phase 1
    pub initial_attempts: u32,
    /// Wrong PINs allowed in phase 2 and above
    pub escalated_attempts: u32,
    /// Lockout length in milliseconds
    pub lockout_duration_ms: u64,
    /// Ceiling for the phase counter
    pub max_phase: u32,
    /// Number of lockouts that turns on the help flag
    pub help_after_lockouts: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            initial_attempts: DEFAULT_INITIAL_ATTEMPTS,
            escalated_attempts: DEFAULT_ESCALATED_ATTEMPTS,
            lockout_duration_ms: DEFAULT_LOCKOUT_DURATION_MS,
            max_phase: DEFAULT_MAX_PHASE,
            help_after_lockouts: DEFAULT_HELP_AFTER_LOCKOUTS,
        }
    }
}

impl LockoutConfig {
    /// Lockout length as a `Duration`
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_millis(self.lockout_duration_ms)
    }

    /// Reject configurations that would make the policy meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_attempts == 0 || self.escalated_attempts == 0 {
            return Err(ConfigError::Invalid(
                "attempt budgets must be at least 1".to_string(),
            ));
        }
        if self.lockout_duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "lockout_duration_ms must be positive".to_string(),
            ));
        }
        if self.max_phase == 0 {
            return Err(ConfigError::Invalid("max_phase must be at least 1".to_string()));
        }
        if self.help_after_lockouts == 0 {
            return Err(ConfigError::Invalid(
                "help_after_lockouts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Throttling state of one authentication session
///
/// Only [`LockoutPolicy::apply`] produces new values of this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutState {
    phase: u32,
    failed_attempts: u32,
    lockout_ends_at: Option<Instant>,
    escalation_count: u32,
    help_advised: bool,
}

impl Default for LockoutState {
    fn default() -> Self {
        Self {
            phase: 1,
            failed_attempts: 0,
            lockout_ends_at: None,
            escalation_count: 0,
            help_advised: false,
        }
    }
}

impl LockoutState {
    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn is_locked(&self) -> bool {
        self.lockout_ends_at.is_some()
    }

    pub fn lockout_ends_at(&self) -> Option<Instant> {
        self.lockout_ends_at
    }

    pub fn escalation_count(&self) -> u32 {
        self.escalation_count
    }

    pub fn help_advised(&self) -> bool {
        self.help_advised
    }

    /// Time left on the countdown, zero when unlocked or already due
    pub fn remaining(&self, now: Instant) -> Duration {
        self.lockout_ends_at
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// Input to the lockout state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutEvent {
    /// A PIN was checked against the directory
    Submit { matched: bool, now: Instant },
    /// Time passed
    Tick { now: Instant },
    /// Start over as a brand-new session
    Reset,
}

/// What a single transition did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutOutcome {
    /// Matching PIN; failure counter cleared
    Accepted,
    /// Wrong PIN, still open
    Rejected { remaining_attempts: u32 },
    /// Wrong PIN that exhausted the budget; countdown started
    LockedOut {
        remaining_ms: u64,
        escalation_count: u32,
        help_advised: bool,
    },
    /// Submission refused because the countdown is running
    StillLocked { remaining_ms: u64 },
    /// Countdown reached zero
    Unlocked,
    /// Tick with nothing due
    NoChange,
    /// State returned to its initial value
    Reset,
}

/// Read-only view for rendering the PIN dialog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LockoutSnapshot {
    pub locked: bool,
    pub remaining_ms: u64,
    pub remaining_attempts: u32,
    pub escalation_count: u32,
    pub help_advised: bool,
    pub phase: u32,
}

impl LockoutSnapshot {
    pub fn countdown_label(&self) -> String {
        countdown_label(self.remaining_ms)
    }
}

/// Countdown as `MM:SS`, rounding partial seconds up
pub fn countdown_label(remaining_ms: u64) -> String {
    let secs = remaining_ms.div_ceil(1000);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Escalating lockout policy
#[derive(Clone, Debug, Default)]
pub struct LockoutPolicy {
    config: LockoutConfig,
}

impl LockoutPolicy {
    pub fn new(config: LockoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Attempt budget for a phase; anything past phase 1 gets the escalated budget
    pub fn max_attempts_for_phase(&self, phase: u32) -> u32 {
        if phase <= 1 {
            self.config.initial_attempts
        } else {
            self.config.escalated_attempts
        }
    }

    /// Wrong PINs left before the next lockout, zero while locked
    pub fn remaining_attempts(&self, state: &LockoutState) -> u32 {
        if state.is_locked() {
            return 0;
        }
        self.max_attempts_for_phase(state.phase)
            .saturating_sub(state.failed_attempts)
    }

    /// Apply one event
    pub fn apply(
        &self,
        state: LockoutState,
        event: LockoutEvent,
    ) -> (LockoutState, LockoutOutcome) {
        match event {
            LockoutEvent::Reset => (LockoutState::default(), LockoutOutcome::Reset),
            LockoutEvent::Tick { now } => match Self::expire(state, now) {
                Some(unlocked) => (unlocked, LockoutOutcome::Unlocked),
                None => (state, LockoutOutcome::NoChange),
            },
            LockoutEvent::Submit { matched, now } => {
                // A due unlock always lands before the submission is judged
                let state = Self::expire(state, now).unwrap_or(state);

                if state.is_locked() {
                    let remaining_ms = millis(state.remaining(now));
                    return (state, LockoutOutcome::StillLocked { remaining_ms });
                }

                if matched {
                    let next = LockoutState {
                        failed_attempts: 0,
                        ..state
                    };
                    return (next, LockoutOutcome::Accepted);
                }

                self.record_failure(state, now)
            }
        }
    }

    /// Build the display snapshot for `state` at `now`
    pub fn snapshot(&self, state: &LockoutState, now: Instant) -> LockoutSnapshot {
        LockoutSnapshot {
            locked: state.is_locked(),
            remaining_ms: millis(state.remaining(now)),
            remaining_attempts: self.remaining_attempts(state),
            escalation_count: state.escalation_count,
            help_advised: state.help_advised,
            phase: state.phase,
        }
    }

    /// Human-readable description of the current throttling state
    pub fn describe(&self, state: &LockoutState, now: Instant) -> String {
        if state.is_locked() {
            let secs = state.remaining(now).as_secs();
            if secs < 60 {
                format!("Locked for {} seconds", secs)
            } else {
                format!("Locked for {} minutes", secs.div_ceil(60))
            }
        } else {
            format!("{} attempts remaining", self.remaining_attempts(state))
        }
    }

    fn record_failure(&self, state: LockoutState, now: Instant) -> (LockoutState, LockoutOutcome) {
        let failed_attempts = state.failed_attempts + 1;
        let budget = self.max_attempts_for_phase(state.phase);

        if failed_attempts < budget {
            let next = LockoutState {
                failed_attempts,
                ..state
            };
            let remaining_attempts = budget - failed_attempts;
            return (next, LockoutOutcome::Rejected { remaining_attempts });
        }

        let escalation_count = state.escalation_count.saturating_add(1);
        let help_advised =
            state.help_advised || escalation_count >= self.config.help_after_lockouts;
        let duration = self.config.lockout_duration();
        let next = LockoutState {
            phase: (state.phase + 1).min(self.config.max_phase.max(1)),
            failed_attempts,
            lockout_ends_at: Some(now + duration),
            escalation_count,
            help_advised,
        };
        (
            next,
            LockoutOutcome::LockedOut {
                remaining_ms: millis(duration),
                escalation_count,
                help_advised,
            },
        )
    }

    fn expire(state: LockoutState, now: Instant) -> Option<LockoutState> {
        match state.lockout_ends_at {
            Some(until) if now >= until => Some(LockoutState {
                failed_attempts: 0,
                lockout_ends_at: None,
                ..state
            }),
            _ => None,
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
