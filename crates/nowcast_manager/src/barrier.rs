//! The race-condition barrier: transient manager state that delays a
//! declared set of successor launches until a declared set of workers has
//! all completed.
//!
//! Slightly surprising ordering, preserved deliberately: the bare successor
//! list a hook returns is applied to the *current* message's finalization
//! check even when that same call is the one installing the barrier.

use std::collections::BTreeSet;

use nowcast_protocol::{DispatchOutcome, NextWorker};

/// The workers still owed before `then_launch` can fire, and the successors
/// held pending that completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Barrier {
    pub must_finish: BTreeSet<String>,
    pub then_launch: Vec<NextWorker>,
}

/// Apply one dispatch outcome through the barrier state machine, returning
/// the successors that should actually be launched for this message.
///
/// - If `outcome` carries a barrier install, it replaces any barrier
///   already active -- barriers do not stack.
/// - If a barrier is active and `source` is one of its `must_finish`
///   workers, `source` is removed and this message's successors are
///   diverted into `then_launch` rather than returned.
/// - If `must_finish` becomes empty, `then_launch` is released as the
///   returned successor list and the barrier is cleared.
pub fn apply(slot: &mut Option<Barrier>, source: &str, outcome: DispatchOutcome) -> Vec<NextWorker> {
    let mut successors = outcome.successors;

    if let Some(install) = outcome.barrier {
        *slot = Some(Barrier {
            must_finish: install.must_finish,
            then_launch: Vec::new(),
        });
    }

    if let Some(barrier) = slot.as_mut() {
        if barrier.must_finish.remove(source) {
            barrier.then_launch.extend(successors.drain(..));
        }
    }

    if let Some(barrier) = slot {
        if barrier.must_finish.is_empty() {
            let finished = slot.take().expect("checked Some above");
            successors = finished.then_launch;
        }
    }

    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use nowcast_protocol::BarrierInstall;

    fn outcome(successors: Vec<NextWorker>, barrier: Option<BarrierInstall>) -> DispatchOutcome {
        DispatchOutcome {
            successors,
            barrier,
        }
    }

    #[test]
    fn no_barrier_passes_successors_through_unchanged() {
        let mut slot = None;
        let result = apply(&mut slot, "sleep", outcome(vec![NextWorker::new("awaken")], None));
        assert_eq!(result, vec![NextWorker::new("awaken")]);
        assert!(slot.is_none());
    }

    #[test]
    fn scenario_s5_barrier_sequence() {
        let mut slot: Option<Barrier> = None;

        let must_finish: std::collections::BTreeSet<String> =
            ["B", "C"].iter().map(|s| s.to_string()).collect();
        let install = BarrierInstall { must_finish };
        let launched = apply(
            &mut slot,
            "some_worker",
            outcome(vec![NextWorker::new("A")], Some(install)),
        );
        assert_eq!(launched, vec![NextWorker::new("A")]);
        assert!(slot.is_some());

        let launched = apply(&mut slot, "B", outcome(vec![NextWorker::new("D")], None));
        assert!(launched.is_empty());
        assert_eq!(slot.as_ref().unwrap().must_finish.len(), 1);

        let launched = apply(&mut slot, "C", outcome(vec![NextWorker::new("E")], None));
        assert_eq!(launched, vec![NextWorker::new("D"), NextWorker::new("E")]);
        assert!(slot.is_none());
    }

    #[test]
    fn unrelated_worker_not_in_must_finish_passes_through_while_barrier_active() {
        let mut slot: Option<Barrier> = Some(Barrier {
            must_finish: ["B"].iter().map(|s| s.to_string()).collect(),
            then_launch: Vec::new(),
        });
        let launched = apply(&mut slot, "zzz", outcome(vec![NextWorker::new("X")], None));
        assert_eq!(launched, vec![NextWorker::new("X")]);
        assert!(slot.is_some());
    }
}
