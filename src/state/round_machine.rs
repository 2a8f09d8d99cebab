use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Phases a room goes through while a game is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Game not started (or not yet hydrated after a restart).
    Idle,
    /// Answers for `round` are being accepted.
    RoundOpen { round: u32 },
    /// `round` is closed; the advancement lease is held until the grace window elapses.
    RoundClosing { round: u32, reason: CloseReason },
    /// Final standings, results and badges are being computed.
    Finalizing,
    /// Game over.
    Finished,
}

impl RoundPhase {
    /// Round the phase refers to, if any.
    pub fn round(&self) -> Option<u32> {
        match self {
            RoundPhase::RoundOpen { round } | RoundPhase::RoundClosing { round, .. } => {
                Some(*round)
            }
            _ => None,
        }
    }

    pub fn is_open(&self, round: u32) -> bool {
        matches!(self, RoundPhase::RoundOpen { round: open } if *open == round)
    }
}

/// Why a round stopped accepting answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Every player in the roster answered.
    AllAnswered,
    /// The round clock expired first.
    TimedOut,
    /// Closed by an earlier process and rebuilt from the store.
    Restored,
}

/// Events that can be applied to the round state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Host started the game; round one opens.
    Start,
    /// Rebuild the in-memory phase for a game whose round is still open.
    Resume { round: u32 },
    /// Rebuild the in-memory phase for a game caught inside a grace window.
    ResumeClosing { round: u32 },
    /// Stop accepting answers for the open round.
    Close(CloseReason),
    /// Grace window elapsed; open the next round.
    Advance,
    /// Last round done (or every player finished); compute final standings.
    Finalize,
    /// Results persisted.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    pub from: RoundPhase,
    pub event: RoundEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
    PhaseMismatch {
        expected: RoundPhase,
        actual: RoundPhase,
    },
    VersionMismatch { expected: usize, actual: usize },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub from: RoundPhase,
    pub to: RoundPhase,
    pub event: RoundEvent,
    pub version_next: usize,
    pub pending_since: Instant,
}

/// Point-in-time view of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: RoundPhase,
    /// Incremented on every applied transition.
    pub version: usize,
    pub pending: Option<RoundPhase>,
}

/// Per-room round state machine.
///
/// Transitions are two-phase: [`plan`](Self::plan) validates and reserves the
/// transition, the caller persists the matching records, then
/// [`apply`](Self::apply) commits it (or [`abort`](Self::abort) releases it).
/// Because a closed round only accepts `Advance` or `Finalize`, a second close
/// for the same round is rejected instead of scheduling a second advancement.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    phase: RoundPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for RoundStateMachine {
    fn default() -> Self {
        Self {
            phase: RoundPhase::Idle,
            version: 0,
            pending: None,
        }
    }
}

impl RoundStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Validate `event` against the current phase and reserve the transition.
    pub fn plan(&mut self, event: RoundEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Commit a planned transition and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoundPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Drop a planned transition, leaving the phase untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (RoundPhase::Idle, RoundEvent::Start) => RoundPhase::RoundOpen { round: 1 },
            (RoundPhase::Idle, RoundEvent::Resume { round }) if round > 0 => {
                RoundPhase::RoundOpen { round }
            }
            (RoundPhase::Idle, RoundEvent::ResumeClosing { round }) if round > 0 => {
                RoundPhase::RoundClosing {
                    round,
                    reason: CloseReason::Restored,
                }
            }
            (RoundPhase::RoundOpen { round }, RoundEvent::Close(reason)) => {
                RoundPhase::RoundClosing { round, reason }
            }
            (RoundPhase::RoundClosing { round, .. }, RoundEvent::Advance) => {
                RoundPhase::RoundOpen { round: round + 1 }
            }
            (
                RoundPhase::Idle | RoundPhase::RoundOpen { .. } | RoundPhase::RoundClosing { .. },
                RoundEvent::Finalize,
            ) => RoundPhase::Finalizing,
            (RoundPhase::Finalizing, RoundEvent::Finish) => RoundPhase::Finished,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut RoundStateMachine, event: RoundEvent) -> RoundPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(RoundStateMachine::new().phase(), RoundPhase::Idle);
    }

    #[test]
    fn full_game_through_two_rounds() {
        let mut sm = RoundStateMachine::new();

        assert_eq!(apply(&mut sm, RoundEvent::Start), RoundPhase::RoundOpen { round: 1 });
        assert_eq!(
            apply(&mut sm, RoundEvent::Close(CloseReason::AllAnswered)),
            RoundPhase::RoundClosing {
                round: 1,
                reason: CloseReason::AllAnswered
            }
        );
        assert_eq!(apply(&mut sm, RoundEvent::Advance), RoundPhase::RoundOpen { round: 2 });
        apply(&mut sm, RoundEvent::Close(CloseReason::TimedOut));
        assert_eq!(apply(&mut sm, RoundEvent::Finalize), RoundPhase::Finalizing);
        assert_eq!(apply(&mut sm, RoundEvent::Finish), RoundPhase::Finished);
        assert_eq!(sm.snapshot().version, 6);
    }

    #[test]
    fn second_close_for_same_round_is_rejected() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::Start);
        apply(&mut sm, RoundEvent::Close(CloseReason::AllAnswered));

        let err = sm.plan(RoundEvent::Close(CloseReason::AllAnswered)).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from.round(), Some(1));
                assert_eq!(invalid.event, RoundEvent::Close(CloseReason::AllAnswered));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finalize_happens_once() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::Start);
        apply(&mut sm, RoundEvent::Finalize);
        apply(&mut sm, RoundEvent::Finish);

        assert!(matches!(
            sm.plan(RoundEvent::Finalize),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn resume_rebuilds_open_round() {
        let mut sm = RoundStateMachine::new();
        assert_eq!(
            apply(&mut sm, RoundEvent::Resume { round: 3 }),
            RoundPhase::RoundOpen { round: 3 }
        );
        assert!(sm.phase().is_open(3));
        assert!(!sm.phase().is_open(2));
    }

    #[test]
    fn resume_closing_holds_the_advancement_lease() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::ResumeClosing { round: 2 });

        assert_eq!(sm.phase().round(), Some(2));
        assert!(!sm.phase().is_open(2));
        assert!(matches!(
            sm.plan(RoundEvent::Close(CloseReason::AllAnswered)),
            Err(PlanError::InvalidTransition(_))
        ));
        assert_eq!(apply(&mut sm, RoundEvent::Advance), RoundPhase::RoundOpen { round: 3 });
    }

    #[test]
    fn pending_plan_blocks_next_plan_until_aborted() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(RoundEvent::Start).unwrap();
        assert_eq!(sm.plan(RoundEvent::Start).unwrap_err(), PlanError::AlreadyPending);
        assert_eq!(sm.snapshot().pending, Some(RoundPhase::RoundOpen { round: 1 }));

        sm.abort(plan.id).unwrap();
        assert_eq!(sm.phase(), RoundPhase::Idle);
        assert!(sm.snapshot().pending.is_none());
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(RoundEvent::Start).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(sm.apply(plan.id).unwrap(), RoundPhase::RoundOpen { round: 1 });
    }
}
