//! Countdown timer and clock ports
//!
//! The session never sleeps on its own. It asks a [`CountdownTimer`] to call
//! back once per cadence while a lockout runs and once more at expiry, and
//! reads time from a [`Clock`]. Production uses [`TokioCountdown`] and
//! [`SystemClock`]; tests drive [`ManualCountdown`] and [`ManualClock`] by hand.
//!
//! Every started countdown carries a guard flag. `cancel` sets it, expiry sets
//! it, and no callback runs once it is set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

/// Default tick cadence
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Called with the time left on every tick
pub type TickCallback = Box<dyn FnMut(Duration) + Send + 'static>;
/// Called once when the countdown reaches zero
pub type ExpireCallback = Box<dyn FnOnce() + Send + 'static>;

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by tokio's time source
///
/// Goes through `tokio::time::Instant` so paused-time tests see the same
/// clock as the timers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Clock that only moves when told to
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    fn set(&self, at: Instant) {
        let mut now = lock(&self.now);
        if at > *now {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

/// Handle to a running countdown
#[derive(Clone, Debug)]
pub struct TimerHandle {
    id: u64,
    done: Arc<AtomicBool>,
}

impl TimerHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the countdown expired or was cancelled
    pub fn is_active(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }
}

/// Ticking countdown port
pub trait CountdownTimer: Send + Sync {
    /// Start counting down `duration`
    fn start(
        &self,
        duration: Duration,
        on_tick: TickCallback,
        on_expire: ExpireCallback,
    ) -> TimerHandle;

    /// Stop a countdown; no-op when it already expired or was cancelled
    fn cancel(&self, handle: &TimerHandle);
}

/// Callbacks of one countdown behind its guard flag
struct Guarded {
    done: Arc<AtomicBool>,
    on_tick: TickCallback,
    on_expire: Option<ExpireCallback>,
}

impl Guarded {
    fn new(handle: &TimerHandle, on_tick: TickCallback, on_expire: ExpireCallback) -> Self {
        Self {
            done: Arc::clone(&handle.done),
            on_tick,
            on_expire: Some(on_expire),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn tick(&mut self, remaining: Duration) {
        if !self.is_done() {
            (self.on_tick)(remaining);
        }
    }

    fn expire(&mut self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(on_expire) = self.on_expire.take() {
            on_expire();
        }
    }
}

/// Countdown driven by a tokio task
///
/// `start` must be called from within a tokio runtime.
pub struct TokioCountdown {
    cadence: Duration,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl Default for TokioCountdown {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl TokioCountdown {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence: cadence.max(Duration::from_millis(1)),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of countdowns still running
    pub fn active(&self) -> usize {
        lock(&self.tasks).len()
    }
}

impl CountdownTimer for TokioCountdown {
    fn start(
        &self,
        duration: Duration,
        on_tick: TickCallback,
        on_expire: ExpireCallback,
    ) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut callbacks = Guarded::new(&handle, on_tick, on_expire);
        let cadence = self.cadence;
        let tasks = Arc::clone(&self.tasks);
        let id = handle.id;

        // Hold the map while spawning so the task cannot remove itself first
        let mut running = lock(&self.tasks);
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let deadline = start + duration;
            let mut next = start;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    callbacks.expire();
                    break;
                }
                callbacks.tick(remaining);
                next += cadence;
                tokio::time::sleep_until(next.min(deadline)).await;
            }
            lock(&tasks).remove(&id);
        });
        running.insert(id, task.abort_handle());

        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        handle.done.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.tasks).remove(&handle.id) {
            task.abort();
        }
    }
}

struct ManualEntry {
    id: u64,
    deadline: Instant,
    next_tick: Instant,
    callbacks: Guarded,
}

impl ManualEntry {
    fn next_event(&self) -> Instant {
        self.next_tick.min(self.deadline)
    }
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    entries: Vec<ManualEntry>,
}

/// Deterministic countdown for tests
///
/// Nothing fires until [`advance`](Self::advance) is called. The first tick
/// of a countdown is due at its start instant, like the tokio timer.
#[derive(Clone)]
pub struct ManualCountdown {
    clock: ManualClock,
    cadence: Duration,
    state: Arc<Mutex<ManualState>>,
}

impl ManualCountdown {
    pub fn new(clock: ManualClock) -> Self {
        Self::with_cadence(clock, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_cadence(clock: ManualClock, cadence: Duration) -> Self {
        Self {
            clock,
            cadence: cadence.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of countdowns neither expired nor cancelled
    pub fn active(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Move the clock forward by `by`, firing every callback that falls due
    ///
    /// Callbacks run without the internal lock held, so they may start or
    /// cancel countdowns themselves.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            let due = lock(&self.state)
                .entries
                .iter()
                .map(ManualEntry::next_event)
                .min();
            match due {
                Some(at) if at <= target => {
                    self.clock.set(at);
                    self.fire(at);
                }
                _ => break,
            }
        }
        self.clock.set(target);
    }

    fn fire(&self, at: Instant) {
        let due: Vec<ManualEntry> = {
            let mut state = lock(&self.state);
            let (due, pending) = std::mem::take(&mut state.entries)
                .into_iter()
                .partition(|entry| entry.next_event() <= at);
            state.entries = pending;
            due
        };

        for mut entry in due {
            if entry.deadline <= at {
                entry.callbacks.expire();
                continue;
            }
            entry.callbacks.tick(entry.deadline.saturating_duration_since(at));
            entry.next_tick += self.cadence;
            if !entry.callbacks.is_done() {
                lock(&self.state).entries.push(entry);
            }
        }
    }
}

impl CountdownTimer for ManualCountdown {
    fn start(
        &self,
        duration: Duration,
        on_tick: TickCallback,
        on_expire: ExpireCallback,
    ) -> TimerHandle {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.next_id += 1;
        let handle = TimerHandle::new(state.next_id);
        state.entries.push(ManualEntry {
            id: handle.id,
            deadline: now + duration,
            next_tick: now,
            callbacks: Guarded::new(&handle, on_tick, on_expire),
        });
        handle
    }

    fn cancel(&self, handle: &TimerHandle) {
        handle.done.store(true, Ordering::SeqCst);
        lock(&self.state).entries.retain(|entry| entry.id != handle.id);
    }
}
