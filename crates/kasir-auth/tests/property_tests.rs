//! Property-based tests for the lockout policy
//!
//! Random streams of submissions, ticks and resets must never break the
//! policy invariants.

use std::time::{Duration, Instant};

use kasir_auth::{LockoutEvent, LockoutOutcome, LockoutPolicy, LockoutState};
use proptest::prelude::*;

// ============================================
// Strategies
// ============================================

#[derive(Clone, Copy, Debug)]
enum Step {
    Submit { matched: bool, after_ms: u64 },
    Tick { after_ms: u64 },
    Reset,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        8 => (any::<bool>(), 0u64..120_000)
            .prop_map(|(matched, after_ms)| Step::Submit { matched, after_ms }),
        3 => (0u64..240_000).prop_map(|after_ms| Step::Tick { after_ms }),
        1 => Just(Step::Reset),
    ]
}

fn to_event(step: Step, now: &mut Instant) -> LockoutEvent {
    match step {
        Step::Submit { matched, after_ms } => {
            *now += Duration::from_millis(after_ms);
            LockoutEvent::Submit { matched, now: *now }
        }
        Step::Tick { after_ms } => {
            *now += Duration::from_millis(after_ms);
            LockoutEvent::Tick { now: *now }
        }
        Step::Reset => LockoutEvent::Reset,
    }
}

// ============================================
// Property Tests
// ============================================

proptest! {
    #[test]
    fn failures_never_exceed_budget_while_open(steps in prop::collection::vec(arb_step(), 1..200)) {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();
        let mut now = Instant::now();

        for step in steps {
            let event = to_event(step, &mut now);
            state = policy.apply(state, event).0;

            if !state.is_locked() {
                prop_assert!(state.failed_attempts() <= policy.max_attempts_for_phase(state.phase()));
            }
            prop_assert!(state.phase() >= 1 && state.phase() <= 2);
        }
    }

    #[test]
    fn escalation_is_monotonic_and_help_implies_two(steps in prop::collection::vec(arb_step(), 1..200)) {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();
        let mut now = Instant::now();

        for step in steps {
            let event = to_event(step, &mut now);
            let (next, _) = policy.apply(state, event);

            if event != LockoutEvent::Reset {
                prop_assert!(next.escalation_count() >= state.escalation_count());
                prop_assert!(!state.help_advised() || next.help_advised());
            }
            prop_assert!(!next.help_advised() || next.escalation_count() >= 2);
            state = next;
        }
    }

    #[test]
    fn lockouts_always_last_three_minutes(steps in prop::collection::vec(arb_step(), 1..200)) {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();
        let mut now = Instant::now();

        for step in steps {
            let event = to_event(step, &mut now);
            let (next, outcome) = policy.apply(state, event);

            if let LockoutOutcome::LockedOut { remaining_ms, .. } = outcome {
                prop_assert_eq!(remaining_ms, 180_000);
                prop_assert_eq!(next.lockout_ends_at(), Some(now + Duration::from_secs(180)));
                prop_assert_eq!(next.failed_attempts(), policy.max_attempts_for_phase(state.phase()));
            }
            state = next;
        }
    }

    #[test]
    fn locked_submissions_change_nothing(offset_ms in 0u64..179_999, matched in any::<bool>()) {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::default();
        let start = Instant::now();
        for _ in 0..5 {
            state = policy.apply(state, LockoutEvent::Submit { matched: false, now: start }).0;
        }

        let now = start + Duration::from_millis(offset_ms);
        let (next, outcome) = policy.apply(state, LockoutEvent::Submit { matched, now });
        prop_assert_eq!(next, state);
        let is_still_locked = matches!(outcome, LockoutOutcome::StillLocked { .. });
        prop_assert!(is_still_locked);
    }

    #[test]
    fn reset_behaves_like_a_fresh_state(
        prefix in prop::collection::vec(arb_step(), 0..100),
        suffix in prop::collection::vec(arb_step(), 1..50),
    ) {
        let policy = LockoutPolicy::default();
        let mut now = Instant::now();
        let mut used = LockoutState::default();
        for step in prefix {
            let event = to_event(step, &mut now);
            used = policy.apply(used, event).0;
        }
        used = policy.apply(used, LockoutEvent::Reset).0;
        let mut fresh = LockoutState::default();

        for step in suffix {
            let event = to_event(step, &mut now);
            let (a, outcome_a) = policy.apply(used, event);
            let (b, outcome_b) = policy.apply(fresh, event);
            prop_assert_eq!(outcome_a, outcome_b);
            prop_assert_eq!(a, b);
            used = a;
            fresh = b;
        }
    }
}
