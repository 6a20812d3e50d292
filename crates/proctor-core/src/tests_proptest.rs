//! Property-based checks for session invariants under random tick streams.

use proptest::prelude::*;

use crate::config::ProctorConfig;
use crate::error::ProctorError;
use crate::session::{SessionState, SessionStateMachine};
use crate::signal::PerceptionSignal;

fn arb_signal() -> impl Strategy<Value = PerceptionSignal> {
    (
        0u32..4,
        any::<bool>(),
        any::<bool>(),
        0.0f32..=1.0,
        prop::option::of((0.0f32..1.0, 0.0f32..1.0)),
        prop::bool::weighted(0.1),
    )
        .prop_map(|(faces, looking, fullscreen, posture, head, anomaly)| {
            let mut signal = PerceptionSignal::compliant(0)
                .with_face_count(faces)
                .with_gaze(Default::default(), looking)
                .with_posture(posture)
                .with_fullscreen(fullscreen);
            if let Some((x, y)) = head {
                signal = signal.with_head_position(x, y);
            }
            if anomaly {
                signal = signal.with_screen_anomaly("overlay");
            }
            signal
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn fullscreen_count_is_monotonic_and_bounded(signals in prop::collection::vec(arb_signal(), 1..40)) {
        let config = ProctorConfig::default();
        let max = config.violations.max_fullscreen_violations;
        let mut machine = SessionStateMachine::start_at("p", "u", &config, 0);
        let mut last = 0u32;

        for (i, mut signal) in signals.into_iter().enumerate() {
            signal.timestamp_us = i as i64;
            let _ = machine.ingest(signal);
            let count = machine.session().fullscreen_violation_count;
            prop_assert!(count >= last);
            prop_assert!(count <= max);
            last = count;
        }
    }

    #[test]
    fn terminal_state_is_absorbing(signals in prop::collection::vec(arb_signal(), 1..40)) {
        let mut machine = SessionStateMachine::start_at("p", "u", &ProctorConfig::default(), 0);

        for (i, mut signal) in signals.into_iter().enumerate() {
            signal.timestamp_us = i as i64;
            let before_state = machine.state();
            let before_len = machine.session().history.len();
            let before_reason = machine.session().termination_reason;

            let result = machine.ingest(signal);

            if before_state == SessionState::Terminated {
                prop_assert!(
                    matches!(result, Err(ProctorError::SessionInactive { .. })),
                    "terminated session accepted a signal"
                );
                prop_assert_eq!(machine.session().history.len(), before_len);
                prop_assert_eq!(machine.session().termination_reason, before_reason);
            } else if let Ok(outcome) = result {
                prop_assert_eq!(outcome.status, machine.state());
                prop_assert_eq!(
                    outcome.termination_result.is_some(),
                    machine.state() == SessionState::Terminated
                );
            }
        }
    }
}
