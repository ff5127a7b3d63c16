//! Kasir Auth - PIN step-up authentication for the Kasir console
//!
//! Guards the owner dashboard and other sensitive actions behind a six-digit
//! PIN with an escalating lockout:
//!
//! - [`lockout`]: the pure lockout state machine
//! - [`session`]: one interactive PIN dialog (digits, lookup, countdown)
//! - [`timer`]: countdown and clock ports with tokio and manual backends
//! - [`directory`]: the credential directory port and bundled directories
//!
//! Lockout state is scoped to a single session and never persisted.

pub mod config;
pub mod directory;
pub mod error;
pub mod lockout;
pub mod session;
pub mod timer;

pub use config::AuthConfig;
pub use directory::{
    hash_pin, CredentialDirectory, CredentialEntry, HashedDirectory, Identity, MemoryDirectory,
    Pin, PIN_LENGTH,
};
pub use error::{AuthError, ConfigError, DirectoryError, Result};
pub use lockout::{
    countdown_label, LockoutConfig, LockoutEvent, LockoutOutcome, LockoutPolicy, LockoutSnapshot,
    LockoutState,
};
pub use session::{
    AuthOutcome, AuthenticationSession, CompositionState, SessionBuilder, SessionEvent,
    SessionPhase,
};
pub use timer::{
    Clock, CountdownTimer, ManualClock, ManualCountdown, SystemClock, TimerHandle, TokioCountdown,
};
