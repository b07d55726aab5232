mod engine;
mod schedule;

pub use engine::{BlockId, Progress, SessionId, SessionState, SessionStatus};
pub use schedule::{compute_sequence, BlockSpec, PhaseKind, PhaseStep, Sequence, MAX_BLOCK_MINUTES};
