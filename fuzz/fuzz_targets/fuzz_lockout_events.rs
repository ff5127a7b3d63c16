#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use kasir_auth::{LockoutEvent, LockoutOutcome, LockoutPolicy, LockoutState};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Step {
    Submit { matched: bool, after_ms: u32 },
    Tick { after_ms: u32 },
    Reset,
}

fuzz_target!(|steps: Vec<Step>| {
    let policy = LockoutPolicy::default();
    let lockout = policy.config().lockout_duration();
    let mut now = Instant::now();
    let mut state = LockoutState::default();

    for step in steps {
        let event = match step {
            Step::Submit { matched, after_ms } => {
                now += Duration::from_millis(u64::from(after_ms));
                LockoutEvent::Submit { matched, now }
            }
            Step::Tick { after_ms } => {
                now += Duration::from_millis(u64::from(after_ms));
                LockoutEvent::Tick { now }
            }
            Step::Reset => LockoutEvent::Reset,
        };

        let before = state;
        let (next, outcome) = policy.apply(state, event);

        // Escalation never goes backwards except on reset
        if !matches!(event, LockoutEvent::Reset) {
            assert!(next.escalation_count() >= before.escalation_count());
            assert!(next.phase() >= before.phase());
        }
        assert!(next.phase() <= policy.config().max_phase);
        assert!(next.failed_attempts() < policy.max_attempts_for_phase(next.phase()) || next.is_locked());
        if next.help_advised() {
            assert!(next.escalation_count() >= policy.config().help_after_lockouts);
        }

        match outcome {
            LockoutOutcome::LockedOut { remaining_ms, .. } => {
                assert_eq!(Duration::from_millis(remaining_ms), lockout);
            }
            LockoutOutcome::StillLocked { .. } => assert_eq!(next, before),
            _ => {}
        }
        assert!(next.remaining(now) <= lockout);

        state = next;
    }
});
