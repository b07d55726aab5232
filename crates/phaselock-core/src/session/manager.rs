//! Session control and background ticking.
//!
//! [`SessionManager`] owns the ticking task of every running session. The
//! session store is the single source of truth: every control operation and
//! every tick loads the session, applies a transition from
//! [`crate::timer::SessionState`] and writes the result back before the
//! snapshot is published.
//!
//! Concurrency rules:
//! - All mutations of one session are serialized on that session's async
//!   lock. Ticks of different sessions never wait on each other.
//! - `start` and restarting a stopped session additionally take the
//!   admission lock, so two callers cannot both pass the "no active
//!   session" check.
//! - A control operation saves the new state first and only then stops or
//!   replaces the session's ticker (cancel, then await the task), all while
//!   holding the session lock. A failed save leaves the ticker running. The
//!   ticker waits for that lock inside a `select!` on its cancellation token,
//!   so it always exits.
//! - Lock entries are dropped from the registry once no operation holds them
//!   and no ticker is registered, including when the operation failed.
//! - Completed sessions keep their cached sequence for the configured grace
//!   delay, then it is evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::clock::{Clock, SystemClock};
use super::sink::{StatusSink, TracingSink};
use crate::error::{CoreError, Result};
use crate::events::StatusSnapshot;
use crate::storage::{BlockStore, SessionStore, TimerSettings};
use crate::timer::{
    compute_sequence, BlockId, Progress, Sequence, SessionId, SessionState, SessionStatus,
};

struct TickerHandle {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    locks: HashMap<SessionId, Arc<AsyncMutex<()>>>,
    sequences: HashMap<SessionId, Arc<Sequence>>,
    tickers: HashMap<SessionId, TickerHandle>,
}

/// A held session lock. Releasing it drops the registry entry when nothing
/// else uses it.
struct SessionGuard<'a> {
    inner: &'a Inner,
    session_id: SessionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner.forget_lock_if_idle(self.session_id);
    }
}

enum TickOutcome {
    Continue,
    Stop,
}

struct Inner {
    blocks: Arc<dyn BlockStore>,
    sessions: Arc<dyn SessionStore>,
    sink: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    completion_grace: Duration,
    admission: AsyncMutex<()>,
    registry: Mutex<Registry>,
    next_generation: AtomicU64,
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    blocks: Arc<dyn BlockStore>,
    sessions: Arc<dyn SessionStore>,
    sink: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    settings: TimerSettings,
}

impl SessionManagerBuilder {
    pub fn sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(mut self, settings: TimerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SessionManager {
        // A zero period would make tokio's interval panic.
        let tick_interval = self.settings.tick_interval().max(Duration::from_millis(1));
        SessionManager {
            inner: Arc::new(Inner {
                blocks: self.blocks,
                sessions: self.sessions,
                sink: self.sink,
                clock: self.clock,
                tick_interval,
                completion_grace: self.settings.completion_grace(),
                admission: AsyncMutex::new(()),
                registry: Mutex::new(Registry::default()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }
}

/// Runs timer sessions: control operations, ticking and status queries.
///
/// Cloning is cheap and every clone drives the same sessions. Ticking tasks
/// only hold a weak reference, so they wind down once the last clone is
/// dropped; call [`SessionManager::shutdown`] to stop them deterministically.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn builder(
        blocks: Arc<dyn BlockStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            blocks,
            sessions,
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            settings: TimerSettings::default(),
        }
    }

    /// Builder for a store that keeps both blocks and sessions.
    pub fn builder_with_store<S>(store: Arc<S>) -> SessionManagerBuilder
    where
        S: BlockStore + SessionStore + 'static,
    {
        Self::builder(store.clone(), store)
    }

    /// Start a new session on `block_id`.
    ///
    /// # Errors
    ///
    /// [`CoreError::SessionAlreadyActive`] if any session is running or
    /// paused, or `NotFound` if the block does not exist.
    pub async fn start(&self, block_id: BlockId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _admit = inner.admission.lock().await;

        if let Some(active) = inner.sessions.find_active_session()? {
            return Err(CoreError::SessionAlreadyActive {
                active_session_id: active.id,
            });
        }
        let block = inner
            .blocks
            .load_block(block_id)?
            .ok_or_else(|| CoreError::block_not_found(block_id))?;
        let sequence = Arc::new(compute_sequence(&block.spec));

        let mut session = SessionState::new(block.id);
        session.begin(&sequence, inner.clock.now());
        session.id = inner.sessions.insert_session(&session)?;
        inner.cache_sequence(session.id, sequence.clone());

        let _guard = inner.lock_session(session.id).await;
        inner.spawn_ticker(session.id).await;

        tracing::info!(
            session_id = session.id,
            block_id,
            phases = sequence.total_phases(),
            "timer session started"
        );
        Ok(inner.publish(&session, &sequence))
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless the session is running.
    pub async fn pause(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _guard = inner.lock_session(session_id).await;

        let mut session = inner.load(session_id)?;
        session.pause(inner.clock.now())?;
        inner.sessions.save_session(&session)?;
        inner.stop_ticker(session_id).await;

        tracing::info!(session_id, remaining = session.remaining_seconds, "timer session paused");
        let sequence = inner.sequence_for(&session)?;
        Ok(inner.publish(&session, &sequence))
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless the session is paused.
    pub async fn resume(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _guard = inner.lock_session(session_id).await;

        let mut session = inner.load(session_id)?;
        session.resume()?;
        let sequence = inner.sequence_for(&session)?;
        inner.sessions.save_session(&session)?;
        inner.spawn_ticker(session_id).await;

        tracing::info!(session_id, remaining = session.remaining_seconds, "timer session resumed");
        Ok(inner.publish(&session, &sequence))
    }

    /// Rewind to the first phase and run.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for a completed session. Restarting a stopped
    /// session is a fresh admission and fails with
    /// [`CoreError::SessionAlreadyActive`] if another session is active.
    pub async fn restart(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _admit = inner.admission.lock().await;
        let _guard = inner.lock_session(session_id).await;

        let mut session = inner.load(session_id)?;
        if session.status == SessionStatus::Stopped {
            if let Some(active) = inner.sessions.find_active_session()? {
                if active.id != session_id {
                    return Err(CoreError::SessionAlreadyActive {
                        active_session_id: active.id,
                    });
                }
            }
        }

        let sequence = inner.sequence_for(&session)?;
        session.restart(&sequence, inner.clock.now())?;
        inner.sessions.save_session(&session)?;
        inner.cache_sequence(session_id, sequence.clone());
        inner.spawn_ticker(session_id).await;

        tracing::info!(session_id, "timer session restarted");
        Ok(inner.publish(&session, &sequence))
    }

    /// End the current phase early. Skipping the final phase completes the
    /// session.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the session is running or paused.
    pub async fn skip(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _guard = inner.lock_session(session_id).await;

        let mut session = inner.load(session_id)?;
        let sequence = inner.sequence_for(&session)?;
        let progress = session.skip(&sequence, inner.clock.now())?;
        inner.sessions.save_session(&session)?;
        inner.stop_ticker(session_id).await;

        match progress {
            Progress::Completed => {
                tracing::info!(session_id, "timer session completed by skip");
                inner.schedule_eviction(session_id);
            }
            _ => {
                tracing::info!(
                    session_id,
                    phase = %session.current_phase,
                    index = session.current_phase_index,
                    "phase skipped"
                );
                if session.status == SessionStatus::Running {
                    inner.spawn_ticker(session_id).await;
                }
            }
        }
        Ok(inner.publish(&session, &sequence))
    }

    /// Stop the session. Cancelling a stopped or completed session changes
    /// nothing and returns its current status.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session does not exist.
    pub async fn cancel(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _guard = inner.lock_session(session_id).await;

        let mut session = inner.load(session_id)?;
        let sequence = inner.sequence_for(&session)?;
        let changed = session.cancel();
        if changed {
            inner.sessions.save_session(&session)?;
        }
        inner.stop_ticker(session_id).await;

        let snapshot = if changed {
            tracing::info!(session_id, "timer session cancelled");
            inner.publish(&session, &sequence)
        } else {
            tracing::debug!(session_id, status = %session.status, "cancel ignored");
            StatusSnapshot::new(&session, &sequence)
        };

        if session.status == SessionStatus::Stopped {
            inner.evict_sequence(session_id);
        }
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// `NotFound` if the session or its block does not exist.
    pub async fn get_status(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let session = self.inner.load(session_id)?;
        let sequence = self.inner.sequence_for(&session)?;
        Ok(StatusSnapshot::new(&session, &sequence))
    }

    /// Make sure a running session is being ticked by this manager.
    ///
    /// Sessions outlive the process that started them; a new process picks
    /// a running session back up with this. Paused, stopped and completed
    /// sessions are returned unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session or its block does not exist.
    pub async fn attach(&self, session_id: SessionId) -> Result<StatusSnapshot> {
        let inner = &self.inner;
        let _guard = inner.lock_session(session_id).await;

        let session = inner.load(session_id)?;
        let sequence = inner.sequence_for(&session)?;
        let ticking = inner.registry().tickers.contains_key(&session_id);
        if session.status == SessionStatus::Running && !ticking {
            inner.spawn_ticker(session_id).await;
            tracing::info!(session_id, "attached to running session");
        }
        Ok(StatusSnapshot::new(&session, &sequence))
    }

    /// Snapshot of the running or paused session, if there is one.
    pub async fn get_active_session(&self) -> Result<Option<StatusSnapshot>> {
        match self.inner.sessions.find_active_session()? {
            Some(session) => {
                let sequence = self.inner.sequence_for(&session)?;
                Ok(Some(StatusSnapshot::new(&session, &sequence)))
            }
            None => Ok(None),
        }
    }

    /// Stop every ticking task. Session state in the store is left as is, so
    /// running sessions can be picked up again with `resume` after a pause or
    /// by a new manager.
    pub async fn shutdown(&self) {
        let handles: Vec<(SessionId, TickerHandle)> =
            self.inner.registry().tickers.drain().collect();
        for (session_id, handle) in handles {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!(session_id, "ticker task ended abnormally: {e}");
            }
        }
        tracing::debug!("session manager shut down");
    }

    /// Whether a ticking task is currently registered for the session.
    pub fn is_ticking(&self, session_id: SessionId) -> bool {
        self.inner.registry().tickers.contains_key(&session_id)
    }

    /// Whether the session's phase sequence is currently cached.
    pub fn is_cached(&self, session_id: SessionId) -> bool {
        self.inner.registry().sequences.contains_key(&session_id)
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Every update is a single map operation, so a poisoned registry is
        // still consistent.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session_lock(&self, session_id: SessionId) -> Arc<AsyncMutex<()>> {
        self.registry()
            .locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn lock_session(&self, session_id: SessionId) -> SessionGuard<'_> {
        let guard = self.session_lock(session_id).lock_owned().await;
        SessionGuard {
            inner: self,
            session_id,
            guard: Some(guard),
        }
    }

    fn forget_lock_if_idle(&self, session_id: SessionId) {
        let mut registry = self.registry();
        let idle = registry
            .locks
            .get(&session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle && !registry.tickers.contains_key(&session_id) {
            registry.locks.remove(&session_id);
        }
    }

    fn load(&self, session_id: SessionId) -> Result<SessionState> {
        self.sessions
            .load_session(session_id)?
            .ok_or_else(|| CoreError::session_not_found(session_id))
    }

    fn cache_sequence(&self, session_id: SessionId, sequence: Arc<Sequence>) {
        self.registry().sequences.insert(session_id, sequence);
    }

    fn evict_sequence(&self, session_id: SessionId) {
        self.registry().sequences.remove(&session_id);
    }

    /// Cached sequence for the session, recomputed from its block on a miss.
    /// Only running and paused sessions are cached; anything else would never
    /// be evicted again.
    fn sequence_for(&self, session: &SessionState) -> Result<Arc<Sequence>> {
        if let Some(sequence) = self.registry().sequences.get(&session.id) {
            return Ok(sequence.clone());
        }
        let block = self
            .blocks
            .load_block(session.block_id)?
            .ok_or_else(|| CoreError::block_not_found(session.block_id))?;
        let sequence = Arc::new(compute_sequence(&block.spec));
        if session.status.is_active() {
            self.cache_sequence(session.id, sequence.clone());
        }
        Ok(sequence)
    }

    fn publish(&self, session: &SessionState, sequence: &Sequence) -> StatusSnapshot {
        let snapshot = StatusSnapshot::new(session, sequence);
        if let Err(e) = self.sink.publish(session.id, &snapshot) {
            tracing::warn!(session_id = session.id, "failed to publish timer status: {e}");
        }
        snapshot
    }

    /// Cancel the session's ticker and wait for it to exit. Must be called
    /// with the session lock held.
    async fn stop_ticker(&self, session_id: SessionId) {
        let handle = self.registry().tickers.remove(&session_id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!(session_id, "ticker task ended abnormally: {e}");
            }
        }
    }

    /// Replace the session's ticker with a fresh one. Must be called with the
    /// session lock held.
    async fn spawn_ticker(self: &Arc<Self>, session_id: SessionId) {
        self.stop_ticker(session_id).await;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let first_tick = Instant::now() + self.tick_interval;
        let join = tokio::spawn(run_ticker(
            Arc::downgrade(self),
            session_id,
            generation,
            cancel.clone(),
            first_tick,
            self.tick_interval,
        ));
        self.registry().tickers.insert(
            session_id,
            TickerHandle {
                generation,
                cancel,
                join,
            },
        );
    }

    /// Drop the registry entry of a ticker that stopped on its own, unless a
    /// newer ticker has already replaced it.
    fn forget_ticker(&self, session_id: SessionId, generation: u64) {
        let mut registry = self.registry();
        if registry
            .tickers
            .get(&session_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            registry.tickers.remove(&session_id);
        }
    }

    fn schedule_eviction(self: &Arc<Self>, session_id: SessionId) {
        let weak = Arc::downgrade(self);
        let grace = self.completion_grace;
        tokio::spawn(async move {
            time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.evict_sequence(session_id);
                inner.forget_lock_if_idle(session_id);
                tracing::debug!(session_id, "evicted completed session");
            }
        });
    }

    /// One tick of a running session. Called by the ticker with the session
    /// lock held.
    fn tick_once(self: &Arc<Self>, session_id: SessionId) -> TickOutcome {
        let mut session = match self.sessions.load_session(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!(session_id, "session vanished, stopping ticker");
                return TickOutcome::Stop;
            }
            Err(e) => {
                tracing::error!(session_id, "failed to load session for tick: {e}");
                return TickOutcome::Continue;
            }
        };
        if session.status != SessionStatus::Running {
            // Changed by another process sharing the store; let followers know.
            tracing::debug!(session_id, status = %session.status, "session not running, stopping ticker");
            if let Ok(sequence) = self.sequence_for(&session) {
                self.publish(&session, &sequence);
            }
            return TickOutcome::Stop;
        }

        let sequence = match self.sequence_for(&session) {
            Ok(sequence) => sequence,
            Err(e) => {
                tracing::error!(session_id, "failed to resolve phase sequence: {e}");
                return TickOutcome::Continue;
            }
        };
        let progress = match session.tick(&sequence, self.clock.now()) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::debug!(session_id, "tick rejected: {e}");
                return TickOutcome::Stop;
            }
        };
        if let Err(e) = self.sessions.save_session(&session) {
            tracing::error!(session_id, "failed to save ticked session: {e}");
            return TickOutcome::Continue;
        }
        self.publish(&session, &sequence);

        match progress {
            Progress::Counting => {
                tracing::trace!(session_id, remaining = session.remaining_seconds, "tick");
                TickOutcome::Continue
            }
            Progress::Advanced(index) => {
                tracing::debug!(session_id, index, phase = %session.current_phase, "phase advanced");
                TickOutcome::Continue
            }
            Progress::Completed => {
                tracing::info!(
                    session_id,
                    elapsed = session.total_elapsed_seconds,
                    "timer session completed"
                );
                self.schedule_eviction(session_id);
                TickOutcome::Stop
            }
        }
    }
}

async fn run_ticker(
    inner: Weak<Inner>,
    session_id: SessionId,
    generation: u64,
    cancel: CancellationToken,
    first_tick: Instant,
    period: Duration,
) {
    let mut interval = time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let lock = inner.session_lock(session_id);
        let guard = tokio::select! {
            _ = cancel.cancelled() => return,
            guard = lock.lock_owned() => guard,
        };
        if cancel.is_cancelled() {
            return;
        }
        if let TickOutcome::Stop = inner.tick_once(session_id) {
            inner.forget_ticker(session_id, generation);
            drop(guard);
            inner.forget_lock_if_idle(session_id);
            return;
        }
    }
}
