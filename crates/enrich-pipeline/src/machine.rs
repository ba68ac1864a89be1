//! Phase transitions of a pipeline run.
//!
//! ```text
//! idle --work found--> enrichment --exhausted--> extraction --exhausted--> embedding
//!   ^                      ^                                                   |
//!   |                      +------ exhausted, work left, cycle made progress --+
//!   +------------------------------ exhausted otherwise ------------------------+
//!
//! any active phase --consecutive fetch errors >= threshold--> failed --reset--> idle
//! ```

use enrich_types::PipelinePhase;

/// Something that happened during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The stage runner returned with rows possibly left
    StageIncomplete,
    /// The stage runner found no more eligible rows
    StageCompleted {
        /// Any stage still has eligible rows
        work_remaining: bool,
        /// At least one success since the current cycle began
        cycle_progressed: bool,
    },
    /// Result of a work check while idle
    WorkCheck { work_found: bool },
    /// A page fetch failed
    FetchFailed { consecutive_errors: u32, threshold: u32 },
    /// Operator reset
    Reset,
}

/// Next phase after `event` in `phase`.
pub fn advance(phase: PipelinePhase, event: PhaseEvent) -> PipelinePhase {
    use PipelinePhase::*;

    match (phase, event) {
        (_, PhaseEvent::Reset) => Idle,
        (Failed, _) => Failed,

        (current, PhaseEvent::FetchFailed { consecutive_errors, threshold }) => {
            if consecutive_errors >= threshold {
                Failed
            } else {
                current
            }
        }

        (Idle, PhaseEvent::WorkCheck { work_found: true }) => Enrichment,
        (Idle, _) => Idle,

        (current, PhaseEvent::StageIncomplete) => current,
        (current, PhaseEvent::WorkCheck { .. }) => current,

        (Enrichment, PhaseEvent::StageCompleted { .. }) => Extraction,
        (Extraction, PhaseEvent::StageCompleted { .. }) => Embedding,
        (
            Embedding,
            PhaseEvent::StageCompleted {
                work_remaining,
                cycle_progressed,
            },
        ) => {
            if work_remaining && cycle_progressed {
                Enrichment
            } else {
                Idle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelinePhase::*;

    fn completed(work_remaining: bool, cycle_progressed: bool) -> PhaseEvent {
        PhaseEvent::StageCompleted {
            work_remaining,
            cycle_progressed,
        }
    }

    #[test]
    fn test_stage_sequence() {
        assert_eq!(advance(Enrichment, completed(false, false)), Extraction);
        assert_eq!(advance(Extraction, completed(false, false)), Embedding);
        assert_eq!(advance(Embedding, completed(false, true)), Idle);
    }

    #[test]
    fn test_incomplete_stays() {
        for phase in [Enrichment, Extraction, Embedding] {
            assert_eq!(advance(phase, PhaseEvent::StageIncomplete), phase);
        }
    }

    #[test]
    fn test_cycle_requires_work_and_progress() {
        assert_eq!(advance(Embedding, completed(true, true)), Enrichment);
        assert_eq!(advance(Embedding, completed(true, false)), Idle);
        assert_eq!(advance(Embedding, completed(false, true)), Idle);
    }

    #[test]
    fn test_idle_work_check() {
        assert_eq!(advance(Idle, PhaseEvent::WorkCheck { work_found: true }), Enrichment);
        assert_eq!(advance(Idle, PhaseEvent::WorkCheck { work_found: false }), Idle);
        assert_eq!(advance(Idle, PhaseEvent::StageIncomplete), Idle);
    }

    #[test]
    fn test_error_threshold() {
        let below = PhaseEvent::FetchFailed {
            consecutive_errors: 4,
            threshold: 5,
        };
        let at = PhaseEvent::FetchFailed {
            consecutive_errors: 5,
            threshold: 5,
        };
        assert_eq!(advance(Extraction, below), Extraction);
        assert_eq!(advance(Extraction, at), Failed);
    }

    #[test]
    fn test_failed_is_sticky_until_reset() {
        assert_eq!(advance(Failed, PhaseEvent::WorkCheck { work_found: true }), Failed);
        assert_eq!(advance(Failed, completed(true, true)), Failed);
        assert_eq!(advance(Failed, PhaseEvent::Reset), Idle);
    }
}
