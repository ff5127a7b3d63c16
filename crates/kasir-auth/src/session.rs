//! Interactive PIN authentication session
//!
//! One [`AuthenticationSession`] backs one PIN dialog. It assembles digits
//! into a candidate, gates directory lookups through the lockout policy and
//! runs the lockout countdown. Lockout state lives and dies with the session;
//! opening a new dialog starts from a clean policy.
//!
//! ```text
//! Composing -> Authenticating -> (Composing | Locked)
//! Locked -> Composing            (countdown expiry)
//! any -> Cancelled               (terminal)
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::AuthConfig;
use crate::directory::{CredentialDirectory, Identity, Pin, PIN_LENGTH};
use crate::error::{AuthError, DirectoryError, Result};
use crate::lockout::{millis, LockoutEvent, LockoutOutcome, LockoutPolicy, LockoutSnapshot, LockoutState};
use crate::timer::{lock, Clock, CountdownTimer, SystemClock, TimerHandle, TokioCountdown};

/// Where a session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Collecting digits
    Composing,
    /// Waiting on the credential directory
    Authenticating,
    /// Lockout countdown running
    Locked,
    /// Abandoned by the caller; terminal
    Cancelled,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Composing => write!(f, "COMPOSING"),
            SessionPhase::Authenticating => write!(f, "AUTHENTICATING"),
            SessionPhase::Locked => write!(f, "LOCKED"),
            SessionPhase::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Result of a completed authentication attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    /// PIN matched
    Success { identity: Identity },
    /// Wrong PIN, dialog still open
    Failure { remaining_attempts: u32 },
    /// Wrong PIN that triggered a lockout
    Locked {
        remaining_ms: u64,
        escalation_count: u32,
        help_advised: bool,
    },
    /// The directory could not answer; retry is up to the caller
    DirectoryError { reason: String },
}

/// Result of entering one digit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompositionState {
    /// Candidate still incomplete
    Composing { filled: usize },
    /// Digit dropped because a lockout is running
    Ignored(LockoutSnapshot),
    /// Sixth digit entered; the candidate was submitted
    Submitted(AuthOutcome),
}

/// Notifications pushed while a lockout runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Countdown tick
    Countdown { remaining_ms: u64 },
    /// Countdown finished; submissions are accepted again
    Unlocked(LockoutSnapshot),
}

/// Digits typed so far, wiped whenever they are consumed or discarded
#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct CandidateBuffer {
    digits: [u8; PIN_LENGTH],
    filled: [bool; PIN_LENGTH],
}

impl CandidateBuffer {
    fn set(&mut self, index: usize, digit: u8) {
        self.digits[index] = digit;
        self.filled[index] = true;
    }

    fn filled(&self) -> usize {
        self.filled.iter().filter(|f| **f).count()
    }

    fn is_complete(&self) -> bool {
        self.filled.iter().all(|f| *f)
    }

    /// Hand out the assembled PIN and wipe the buffer
    fn take_pin(&mut self) -> Option<Pin> {
        if !self.is_complete() {
            return None;
        }
        let pin = Pin::from_digits(&self.digits);
        self.zeroize();
        Some(pin)
    }
}

struct SessionInner {
    phase: SessionPhase,
    lockout: LockoutState,
    candidate: CandidateBuffer,
    countdown: Option<TimerHandle>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    receiver: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl SessionInner {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            phase: SessionPhase::Composing,
            lockout: LockoutState::default(),
            candidate: CandidateBuffer::default(),
            countdown: None,
            events: Some(sender),
            receiver: Some(receiver),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            // Nobody listening is fine
            let _ = events.send(event);
        }
    }

    /// Apply a due unlock; returns the snapshot when the lockout ended
    fn unlock_if_due(&mut self, policy: &LockoutPolicy, now: Instant) -> Option<LockoutSnapshot> {
        let (next, outcome) = policy.apply(self.lockout, LockoutEvent::Tick { now });
        self.lockout = next;
        if outcome != LockoutOutcome::Unlocked {
            return None;
        }
        if self.phase == SessionPhase::Locked {
            self.phase = SessionPhase::Composing;
        }
        let snapshot = policy.snapshot(&next, now);
        self.emit(SessionEvent::Unlocked(snapshot));
        Some(snapshot)
    }
}

/// Puts the session back to composing if an in-flight lookup is abandoned
struct InFlightGuard<'a> {
    inner: &'a Mutex<SessionInner>,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = lock(self.inner);
            if inner.phase == SessionPhase::Authenticating {
                inner.phase = SessionPhase::Composing;
            }
        }
    }
}

/// Builder for [`AuthenticationSession`]
pub struct SessionBuilder {
    directory: Arc<dyn CredentialDirectory>,
    config: AuthConfig,
    timer: Option<Arc<dyn CountdownTimer>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timer(mut self, timer: Arc<dyn CountdownTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> AuthenticationSession {
        let timer = self
            .timer
            .unwrap_or_else(|| Arc::new(TokioCountdown::new(self.config.tick_interval())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let id = Uuid::new_v4();
        debug!("Authentication session {} opened", id);

        AuthenticationSession {
            id,
            inner: Arc::new(Mutex::new(SessionInner::new())),
            directory: self.directory,
            timer,
            clock,
            policy: LockoutPolicy::new(self.config.lockout.clone()),
            lookup_timeout: self.config.lookup_timeout(),
        }
    }
}

/// PIN step-up authentication flow for one dialog
pub struct AuthenticationSession {
    id: Uuid,
    inner: Arc<Mutex<SessionInner>>,
    directory: Arc<dyn CredentialDirectory>,
    timer: Arc<dyn CountdownTimer>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    lookup_timeout: Duration,
}

impl AuthenticationSession {
    /// Session with default config, tokio countdown and system clock
    pub fn new(directory: Arc<dyn CredentialDirectory>) -> Self {
        Self::builder(directory).build()
    }

    pub fn builder(directory: Arc<dyn CredentialDirectory>) -> SessionBuilder {
        SessionBuilder {
            directory,
            config: AuthConfig::default(),
            timer: None,
            clock: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.inner).phase
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Take the countdown event stream; only the first call gets it
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        lock(&self.inner).receiver.take()
    }

    /// Current throttling state
    pub fn lockout_state(&self) -> Result<LockoutState> {
        Ok(self.lock_live()?.lockout)
    }

    /// Snapshot for rendering, as of now
    pub fn snapshot(&self) -> Result<LockoutSnapshot> {
        let inner = self.lock_live()?;
        Ok(self.policy.snapshot(&inner.lockout, self.clock.now()))
    }

    /// "3 attempts remaining" / "Locked for 2 minutes"
    pub fn describe(&self) -> Result<String> {
        let inner = self.lock_live()?;
        Ok(self.policy.describe(&inner.lockout, self.clock.now()))
    }

    /// Write one digit of the candidate
    ///
    /// Filling the last empty position submits the candidate.
    pub async fn submit_digit(&self, index: usize, digit: u8) -> Result<CompositionState> {
        {
            let mut inner = self.lock_live()?;
            if index >= PIN_LENGTH {
                return Err(AuthError::MalformedInput(format!(
                    "digit index {} out of range",
                    index
                )));
            }
            if digit > 9 {
                return Err(AuthError::MalformedInput(format!(
                    "{} is not a decimal digit",
                    digit
                )));
            }

            let now = self.clock.now();
            self.apply_tick(&mut inner, now);
            match inner.phase {
                SessionPhase::Locked => {
                    return Ok(CompositionState::Ignored(
                        self.policy.snapshot(&inner.lockout, now),
                    ));
                }
                SessionPhase::Authenticating => return Err(AuthError::AuthenticationInFlight),
                _ => {}
            }

            inner.candidate.set(index, digit);
            if !inner.candidate.is_complete() {
                return Ok(CompositionState::Composing {
                    filled: inner.candidate.filled(),
                });
            }
        }

        self.authenticate().await.map(CompositionState::Submitted)
    }

    /// Check the assembled candidate against the directory
    pub async fn authenticate(&self) -> Result<AuthOutcome> {
        let pin = {
            let mut inner = self.lock_live()?;
            let now = self.clock.now();
            self.apply_tick(&mut inner, now);

            match inner.phase {
                SessionPhase::Authenticating => return Err(AuthError::AuthenticationInFlight),
                SessionPhase::Locked => {
                    inner.candidate.zeroize();
                    let remaining_ms = millis(inner.lockout.remaining(now));
                    warn!(
                        "Session {} rejected a submission while locked ({} ms left)",
                        self.id, remaining_ms
                    );
                    return Err(AuthError::PolicyViolation { remaining_ms });
                }
                _ => {}
            }

            let Some(pin) = inner.candidate.take_pin() else {
                return Err(AuthError::MalformedInput(format!(
                    "PIN must be {} digits",
                    PIN_LENGTH
                )));
            };
            inner.phase = SessionPhase::Authenticating;
            pin
        };

        let mut guard = InFlightGuard {
            inner: &self.inner,
            armed: true,
        };
        let result = self.lookup(pin).await;

        let mut inner = lock(&self.inner);
        guard.disarm();
        if inner.phase == SessionPhase::Cancelled {
            debug!("Session {} discarded a lookup that resolved after cancel", self.id);
            return Err(AuthError::SessionTerminated);
        }

        let found = match result {
            Ok(found) => found,
            Err(e) => {
                inner.phase = SessionPhase::Composing;
                warn!("Session {} directory lookup failed: {}", self.id, e);
                return Ok(AuthOutcome::DirectoryError {
                    reason: e.to_string(),
                });
            }
        };

        let now = self.clock.now();
        let (next, decision) = self.policy.apply(
            inner.lockout,
            LockoutEvent::Submit {
                matched: found.is_some(),
                now,
            },
        );
        inner.lockout = next;
        self.settle(&mut inner, decision, found)
    }

    /// Map a policy decision on a looked-up PIN to the caller's outcome
    fn settle(
        &self,
        inner: &mut SessionInner,
        decision: LockoutOutcome,
        found: Option<Identity>,
    ) -> Result<AuthOutcome> {
        match (decision, found) {
            (LockoutOutcome::Accepted, Some(identity)) => {
                inner.phase = SessionPhase::Composing;
                info!("Session {} authenticated {}", self.id, identity.id);
                Ok(AuthOutcome::Success { identity })
            }
            (LockoutOutcome::Rejected { remaining_attempts }, _) => {
                inner.phase = SessionPhase::Composing;
                warn!(
                    "Session {} incorrect PIN ({} attempts remaining)",
                    self.id, remaining_attempts
                );
                Ok(AuthOutcome::Failure { remaining_attempts })
            }
            (
                LockoutOutcome::LockedOut {
                    remaining_ms,
                    escalation_count,
                    help_advised,
                },
                _,
            ) => {
                inner.phase = SessionPhase::Locked;
                self.start_countdown(inner, Duration::from_millis(remaining_ms));
                info!(
                    "Session {} locked out for {} ms (lockout #{}, help advised: {})",
                    self.id, remaining_ms, escalation_count, help_advised
                );
                Ok(AuthOutcome::Locked {
                    remaining_ms,
                    escalation_count,
                    help_advised,
                })
            }
            (LockoutOutcome::StillLocked { remaining_ms }, _) => {
                inner.phase = SessionPhase::Locked;
                Err(AuthError::PolicyViolation { remaining_ms })
            }
            (other, _) => {
                inner.phase = SessionPhase::Composing;
                error!("Session {} got {:?} for a submission", self.id, other);
                Err(AuthError::Internal(format!(
                    "lockout policy answered a submission with {:?}",
                    other
                )))
            }
        }
    }

    /// Advance time-based transitions to `now` and report the result
    pub fn tick(&self, now: Instant) -> Result<LockoutSnapshot> {
        let mut inner = self.lock_live()?;
        self.apply_tick(&mut inner, now);
        Ok(self.policy.snapshot(&inner.lockout, now))
    }

    /// Return to the state of a brand-new session
    pub fn reset(&self) -> Result<LockoutSnapshot> {
        let mut inner = self.lock_live()?;
        if inner.phase == SessionPhase::Authenticating {
            return Err(AuthError::AuthenticationInFlight);
        }
        if let Some(handle) = inner.countdown.take() {
            self.timer.cancel(&handle);
        }
        inner.candidate.zeroize();
        inner.lockout = self.policy.apply(inner.lockout, LockoutEvent::Reset).0;
        inner.phase = SessionPhase::Composing;
        debug!("Session {} reset", self.id);
        Ok(self.policy.snapshot(&inner.lockout, self.clock.now()))
    }

    /// Abandon the session
    ///
    /// Stops the countdown and wipes the candidate. Every later call fails
    /// with [`AuthError::SessionTerminated`].
    pub fn cancel(&self) -> Result<()> {
        let mut inner = self.lock_live()?;
        inner.phase = SessionPhase::Cancelled;
        if let Some(handle) = inner.countdown.take() {
            self.timer.cancel(&handle);
        }
        inner.candidate.zeroize();
        inner.events = None;
        info!("Session {} cancelled", self.id);
        Ok(())
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, SessionInner>> {
        let inner = lock(&self.inner);
        if inner.phase == SessionPhase::Cancelled {
            error!("Session {} used after cancel", self.id);
            return Err(AuthError::SessionTerminated);
        }
        Ok(inner)
    }

    async fn lookup(&self, pin: Pin) -> std::result::Result<Option<Identity>, DirectoryError> {
        let lookup = self.directory.lookup_by_pin(&pin);
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(millis(self.lookup_timeout))),
        }
    }

    fn apply_tick(&self, inner: &mut SessionInner, now: Instant) {
        if inner.unlock_if_due(&self.policy, now).is_some() {
            if let Some(handle) = inner.countdown.take() {
                self.timer.cancel(&handle);
            }
            info!("Session {} lockout expired", self.id);
        }
    }

    fn start_countdown(&self, inner: &mut SessionInner, duration: Duration) {
        if let Some(handle) = inner.countdown.take() {
            self.timer.cancel(&handle);
        }
        let Some(ends_at) = inner.lockout.lockout_ends_at() else {
            return;
        };

        let tick_target: Weak<Mutex<SessionInner>> = Arc::downgrade(&self.inner);
        let on_tick = Box::new(move |remaining: Duration| {
            let Some(inner) = tick_target.upgrade() else {
                return;
            };
            let inner = lock(&inner);
            if inner.phase == SessionPhase::Locked {
                inner.emit(SessionEvent::Countdown {
                    remaining_ms: millis(remaining),
                });
            }
        });

        let expire_target: Weak<Mutex<SessionInner>> = Arc::downgrade(&self.inner);
        let policy = self.policy.clone();
        let clock = Arc::clone(&self.clock);
        let id = self.id;
        let on_expire = Box::new(move || {
            let Some(inner) = expire_target.upgrade() else {
                return;
            };
            let mut inner = lock(&inner);
            if inner.phase != SessionPhase::Locked {
                return;
            }
            // The timer has the final word on expiry
            let now = clock.now().max(ends_at);
            if inner.unlock_if_due(&policy, now).is_some() {
                inner.countdown = None;
                info!("Session {} lockout expired", id);
            }
        });

        inner.countdown = Some(self.timer.start(duration, on_tick, on_expire));
    }
}

impl fmt::Debug for AuthenticationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationSession")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Drop for AuthenticationSession {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(handle) = inner.countdown.take() {
            self.timer.cancel(&handle);
        }
    }
}
