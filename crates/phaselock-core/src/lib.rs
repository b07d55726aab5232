//! # PhaseLock Core Library
//!
//! Core logic for the PhaseLock block timer. A block is a fixed stretch of
//! time split into work phases, short breaks and a closing long break; a
//! session walks through those phases one second at a time.
//!
//! ## Architecture
//!
//! - **Timer**: the pure phase sequencer and the session state machine
//! - **Session**: [`SessionManager`], which ticks running sessions in the
//!   background, serializes control operations and pushes status snapshots
//! - **Storage**: SQLite and in-memory stores for blocks and sessions, plus
//!   TOML-based configuration
//! - **Blocks**: creating, listing and previewing block definitions
//!
//! ## Key Components
//!
//! - [`compute_sequence`]: block durations to ordered phases
//! - [`SessionManager`]: start, pause, resume, restart, skip, cancel, status
//! - [`Database`]: persistent block and session storage
//! - [`Config`]: application configuration management

pub mod blocks;
pub mod error;
pub mod events;
pub mod session;
pub mod storage;
pub mod timer;

pub use blocks::{BlockService, BlockView};
pub use error::{ConfigError, CoreError, DatabaseError, EntityKind, ValidationError};
pub use events::StatusSnapshot;
pub use session::{BroadcastSink, SessionManager, StatusSink};
pub use storage::{Block, BlockStore, Config, Database, MemoryStore, SessionStore};
pub use timer::{
    compute_sequence, BlockSpec, PhaseKind, PhaseStep, Sequence, SessionState, SessionStatus,
};
