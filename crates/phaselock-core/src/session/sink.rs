//! Status push.
//!
//! The session manager hands every snapshot to a [`StatusSink`]. Delivery is
//! fire-and-forget: a failing sink is logged by the manager and never fails
//! the control operation that produced the snapshot.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::StatusSnapshot;
use crate::timer::SessionId;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

pub trait StatusSink: Send + Sync {
    fn publish(&self, session_id: SessionId, snapshot: &StatusSnapshot) -> Result<(), SinkError>;
}

/// Fans snapshots out to any number of subscribers over a broadcast channel.
///
/// Having no subscribers is not an error; slow subscribers miss old
/// snapshots (`RecvError::Lagged`) rather than blocking the ticker.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusSnapshot>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl StatusSink for BroadcastSink {
    fn publish(&self, _session_id: SessionId, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(snapshot.clone());
        Ok(())
    }
}

/// Writes every snapshot to the `tracing` log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn publish(&self, session_id: SessionId, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        tracing::debug!(
            session_id,
            status = %snapshot.status,
            phase = %snapshot.current_phase,
            remaining = %snapshot.formatted_remaining_time,
            elapsed = %snapshot.formatted_elapsed_time,
            "timer status"
        );
        Ok(())
    }
}

/// Publishes to several sinks in order. Every sink sees the snapshot even if
/// an earlier one fails; the first error is returned.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl StatusSink for FanoutSink {
    fn publish(&self, session_id: SessionId, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(session_id, snapshot) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{compute_sequence, BlockSpec, SessionState};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> StatusSnapshot {
        let seq = compute_sequence(&BlockSpec::default());
        let mut session = SessionState::new(1);
        session.id = 5;
        session.begin(&seq, Utc::now());
        StatusSnapshot::new(&session, &seq)
    }

    struct FailingSink(AtomicUsize);

    impl StatusSink for FailingSink {
        fn publish(&self, _: SessionId, _: &StatusSnapshot) -> Result<(), SinkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("push channel closed".into())
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(5, &snapshot()).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, 5);
    }

    #[test]
    fn broadcast_without_subscribers_is_ok() {
        assert!(BroadcastSink::default().publish(5, &snapshot()).is_ok());
    }

    #[test]
    fn fanout_reaches_every_sink_and_reports_failure() {
        let failing = Arc::new(FailingSink(AtomicUsize::new(0)));
        let broadcast = BroadcastSink::new(8);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new()
            .with(failing.clone())
            .with(Arc::new(broadcast))
            .with(Arc::new(TracingSink));

        assert!(fanout.publish(5, &snapshot()).is_err());
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_ok());
    }
}
