use serde::{Deserialize, Serialize};

use crate::timer::{BlockId, PhaseKind, Sequence, SessionId, SessionState, SessionStatus};

/// Every state change of a session produces a snapshot.
/// Control operations return it; the status sink receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: SessionId,
    pub block_id: BlockId,
    pub status: SessionStatus,
    pub current_phase: PhaseKind,
    pub current_phase_index: usize,
    pub remaining_seconds: u32,
    pub total_elapsed_seconds: u64,
    pub total_phases: usize,
    /// `MM:SS` of the current phase.
    pub formatted_remaining_time: String,
    /// `HH:MM:SS` of the whole block.
    pub formatted_elapsed_time: String,
}

impl StatusSnapshot {
    pub fn new(session: &SessionState, sequence: &Sequence) -> Self {
        Self {
            session_id: session.id,
            block_id: session.block_id,
            status: session.status,
            current_phase: session.current_phase,
            current_phase_index: session.current_phase_index,
            remaining_seconds: session.remaining_seconds,
            total_elapsed_seconds: session.total_elapsed_seconds,
            total_phases: sequence.total_phases(),
            formatted_remaining_time: format_remaining(session.remaining_seconds as u64),
            formatted_elapsed_time: format_elapsed(session.total_elapsed_seconds),
        }
    }
}

/// Minutes and seconds, both zero-padded. Minutes are not wrapped into
/// hours, so a 90 minute phase reads `90:00`.
pub fn format_remaining(total_seconds: u64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

pub fn format_elapsed(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
