//! Running sessions.
//!
//! [`SessionManager`] drives the session state machine against the stores,
//! ticks running sessions in the background and pushes every change to a
//! [`StatusSink`].

mod clock;
mod manager;
pub mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use sink::{BroadcastSink, FanoutSink, SinkError, StatusSink, TracingSink};
