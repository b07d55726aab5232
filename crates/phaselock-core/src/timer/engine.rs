//! Session state machine.
//!
//! [`SessionState`] is a plain value: every transition takes the session's
//! [`Sequence`] and the current time as arguments and returns an error when
//! the operation is not valid for the current status. Scheduling, locking
//! and persistence live in [`crate::session`]; this module only decides what
//! the next state is.
//!
//! ## State Transitions
//!
//! ```text
//! Stopped -> Running <-> Paused
//!               |          |
//!               +----------+--> Completed
//! Running | Paused --cancel--> Stopped
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{PhaseKind, Sequence};
use crate::error::{CoreError, Result};

pub type SessionId = i64;
pub type BlockId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Stopped,
    Running,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Stopped => "stopped",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stopped" => Some(SessionStatus::Stopped),
            "running" => Some(SessionStatus::Running),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }

    /// Running and paused sessions occupy the single active slot.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a tick or skip left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Still counting down the same phase.
    Counting,
    /// Moved to the phase at the given index.
    Advanced(usize),
    /// The last phase ended.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub block_id: BlockId,
    pub status: SessionStatus,
    pub current_phase: PhaseKind,
    pub current_phase_index: usize,
    /// Seconds left in the current phase.
    pub remaining_seconds: u32,
    /// Seconds spent running across the whole block.
    pub total_elapsed_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// A fresh, stopped session for `block_id`. The id is assigned by the
    /// session store on insert.
    pub fn new(block_id: BlockId) -> Self {
        Self {
            id: 0,
            block_id,
            status: SessionStatus::Stopped,
            current_phase: PhaseKind::Work,
            current_phase_index: 0,
            remaining_seconds: 0,
            total_elapsed_seconds: 0,
            started_at: None,
            paused_at: None,
            completed_at: None,
        }
    }

    fn conflict(&self, operation: &'static str) -> CoreError {
        CoreError::InvalidTransition {
            operation,
            session_id: self.id,
            status: self.status,
        }
    }

    /// Rewind to the first phase and start running.
    ///
    /// Shared by `start` and `restart`; admission control is the caller's
    /// job.
    pub fn begin(&mut self, sequence: &Sequence, now: DateTime<Utc>) {
        let first = sequence.first();
        self.status = SessionStatus::Running;
        self.current_phase = first.kind;
        self.current_phase_index = 0;
        self.remaining_seconds = first.duration_seconds;
        self.total_elapsed_seconds = 0;
        self.started_at = Some(now);
        self.paused_at = None;
        self.completed_at = None;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Running {
            return Err(self.conflict("pause"));
        }
        self.status = SessionStatus::Paused;
        self.paused_at = Some(now);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(self.conflict("resume"));
        }
        self.status = SessionStatus::Running;
        self.paused_at = None;
        Ok(())
    }

    /// Completed sessions are terminal and cannot be restarted.
    pub fn restart(&mut self, sequence: &Sequence, now: DateTime<Utc>) -> Result<()> {
        if self.status == SessionStatus::Completed {
            return Err(self.conflict("restart"));
        }
        self.begin(sequence, now);
        Ok(())
    }

    /// Jump to the next phase, keeping the running/paused status.
    pub fn skip(&mut self, sequence: &Sequence, now: DateTime<Utc>) -> Result<Progress> {
        if !self.status.is_active() {
            return Err(self.conflict("skip"));
        }
        Ok(self.advance(sequence, now))
    }

    /// Returns whether anything changed. Stopped and completed sessions are
    /// left as they are.
    pub fn cancel(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = SessionStatus::Stopped;
        self.paused_at = None;
        true
    }

    /// One second of running time.
    ///
    /// The tick that finds the phase already at zero moves on to the next
    /// phase, so every phase shows `00:00` for exactly one tick and a
    /// zero-length phase is passed through on its first tick. Each phase
    /// therefore lasts its duration plus one tick, and a block run without
    /// skips ends with `total_elapsed_seconds` exceeding
    /// [`Sequence::planned_seconds`] by the number of phases.
    pub fn tick(&mut self, sequence: &Sequence, now: DateTime<Utc>) -> Result<Progress> {
        if self.status != SessionStatus::Running {
            return Err(self.conflict("tick"));
        }
        self.total_elapsed_seconds = self.total_elapsed_seconds.saturating_add(1);
        if self.remaining_seconds > 0 {
            self.remaining_seconds -= 1;
            return Ok(Progress::Counting);
        }
        Ok(self.advance(sequence, now))
    }

    fn advance(&mut self, sequence: &Sequence, now: DateTime<Utc>) -> Progress {
        let next = self.current_phase_index + 1;
        match sequence.step(next) {
            Some(step) => {
                self.current_phase_index = next;
                self.current_phase = step.kind;
                self.remaining_seconds = step.duration_seconds;
                Progress::Advanced(next)
            }
            None => {
                self.status = SessionStatus::Completed;
                self.remaining_seconds = 0;
                self.paused_at = None;
                self.completed_at = Some(now);
                Progress::Completed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::schedule::{compute_sequence, BlockSpec};

    fn running(spec: BlockSpec) -> (SessionState, Sequence) {
        let seq = compute_sequence(&spec);
        let mut session = SessionState::new(1);
        session.id = 10;
        session.begin(&seq, Utc::now());
        (session, seq)
    }

    #[test]
    fn begin_loads_first_phase() {
        let (session, _) = running(BlockSpec::default());
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.current_phase, PhaseKind::Work);
        assert_eq!(session.remaining_seconds, 25 * 60);
        assert_eq!(session.total_elapsed_seconds, 0);
        assert!(session.started_at.is_some());
    }

    #[test]
    fn pause_resume_cycle() {
        let (mut session, _) = running(BlockSpec::default());
        session.pause(Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert!(session.paused_at.is_some());

        let err = session.pause(Utc::now()).unwrap_err();
        assert!(err.is_state_conflict());

        session.resume().unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.paused_at.is_none());
        assert!(session.resume().unwrap_err().is_state_conflict());
    }

    #[test]
    fn pause_rejected_when_stopped_or_completed() {
        let mut stopped = SessionState::new(1);
        assert!(stopped.pause(Utc::now()).unwrap_err().is_state_conflict());

        let (mut session, seq) = running(BlockSpec::new(10, 1, 0, 0));
        while session.status != SessionStatus::Completed {
            session.tick(&seq, Utc::now()).unwrap();
        }
        assert!(session.pause(Utc::now()).unwrap_err().is_state_conflict());
    }

    #[test]
    fn tick_reaches_zero_then_advances() {
        let (mut session, seq) = running(BlockSpec::default());
        session.remaining_seconds = 1;

        assert_eq!(session.tick(&seq, Utc::now()).unwrap(), Progress::Counting);
        assert_eq!(session.remaining_seconds, 0);
        assert_eq!(session.current_phase_index, 0);

        assert_eq!(session.tick(&seq, Utc::now()).unwrap(), Progress::Advanced(1));
        assert_eq!(session.current_phase_index, 1);
        assert_eq!(session.current_phase, PhaseKind::ShortBreak);
        assert_eq!(session.remaining_seconds, 5 * 60);
        assert_eq!(session.total_elapsed_seconds, 2);
    }

    #[test]
    fn zero_length_phase_is_passed_on_first_tick() {
        let (mut session, seq) = running(BlockSpec::new(50, 25, 0, 0));
        session.remaining_seconds = 0;
        session.tick(&seq, Utc::now()).unwrap();
        assert_eq!(session.current_phase, PhaseKind::ShortBreak);
        assert_eq!(session.remaining_seconds, 0);
        assert_eq!(session.tick(&seq, Utc::now()).unwrap(), Progress::Advanced(2));
        assert_eq!(session.current_phase, PhaseKind::Work);
    }

    #[test]
    fn full_run_takes_one_extra_tick_per_phase() {
        let (mut session, seq) = running(BlockSpec::new(5, 1, 1, 1));
        let mut ticks = 0u64;
        while session.status != SessionStatus::Completed {
            session.tick(&seq, Utc::now()).unwrap();
            ticks += 1;
        }
        assert_eq!(seq.total_phases(), 4);
        assert_eq!(ticks, seq.planned_seconds() + 4);
        assert_eq!(session.total_elapsed_seconds, ticks);
    }

    #[test]
    fn tick_on_last_phase_completes() {
        let (mut session, seq) = running(BlockSpec::new(10, 25, 5, 0));
        session.remaining_seconds = 0;
        assert_eq!(session.tick(&seq, Utc::now()).unwrap(), Progress::Completed);
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());
        assert!(session.tick(&seq, Utc::now()).unwrap_err().is_state_conflict());
    }

    #[test]
    fn skip_on_final_phase_completes() {
        let (mut session, seq) = running(BlockSpec::default());
        for _ in 0..5 {
            session.skip(&seq, Utc::now()).unwrap();
        }
        assert_eq!(session.current_phase, PhaseKind::LongBreak);
        assert_eq!(session.skip(&seq, Utc::now()).unwrap(), Progress::Completed);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn skip_while_paused_stays_paused_with_full_duration() {
        let (mut session, seq) = running(BlockSpec::default());
        session.remaining_seconds = 42;
        session.pause(Utc::now()).unwrap();
        session.skip(&seq, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.current_phase_index, 1);
        assert_eq!(session.remaining_seconds, 5 * 60);
    }

    #[test]
    fn skip_rejected_when_stopped() {
        let seq = compute_sequence(&BlockSpec::default());
        let mut session = SessionState::new(1);
        assert!(session.skip(&seq, Utc::now()).unwrap_err().is_state_conflict());
    }

    #[test]
    fn restart_resets_progress_from_any_live_status() {
        let (mut session, seq) = running(BlockSpec::default());
        session.skip(&seq, Utc::now()).unwrap();
        session.total_elapsed_seconds = 900;
        session.pause(Utc::now()).unwrap();

        session.restart(&seq, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.current_phase_index, 0);
        assert_eq!(session.total_elapsed_seconds, 0);
        assert!(session.paused_at.is_none());

        session.cancel();
        session.restart(&seq, Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[test]
    fn restart_rejected_after_completion() {
        let (mut session, seq) = running(BlockSpec::new(10, 25, 5, 0));
        session.skip(&seq, Utc::now()).unwrap();
        assert!(session.restart(&seq, Utc::now()).unwrap_err().is_state_conflict());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (mut session, _) = running(BlockSpec::default());
        assert!(session.cancel());
        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(!session.cancel());
        assert_eq!(session.status, SessionStatus::Stopped);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SessionStatus::Stopped,
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert!(SessionStatus::Paused.is_active());
        assert!(!SessionStatus::Completed.is_active());
    }
}
