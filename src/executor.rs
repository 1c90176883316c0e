//! Decision execution boundary.
//!
//! The engine produces [`Decision`]s; a [`DecisionSink`] carries them to
//! whatever sits on the other side. In a dry run that is just the log.

use crate::domain::Decision;

pub trait DecisionSink {
    fn apply(&mut self, decision: &Decision);
}

/// Sink for dry runs: every decision goes to the log and nowhere else.
#[derive(Debug, Default)]
pub struct LogSink;

impl DecisionSink for LogSink {
    fn apply(&mut self, decision: &Decision) {
        tracing::info!(
            action = %decision.action,
            limit_kw = decision.power_limit_kw,
            reason = %decision.reason,
            "applying decision"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BatteryAction;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<BatteryAction>,
    }

    impl DecisionSink for Recorder {
        fn apply(&mut self, decision: &Decision) {
            self.seen.push(decision.action);
        }
    }

    #[test]
    fn test_sink_receives_every_decision() {
        let mut recorder = Recorder::default();
        recorder.apply(&Decision::idle("nothing to do"));
        recorder.apply(&Decision::new(BatteryAction::ChargeGrid, 5.0, "cheap"));
        assert_eq!(
            recorder.seen,
            vec![BatteryAction::Idle, BatteryAction::ChargeGrid]
        );
    }
}
