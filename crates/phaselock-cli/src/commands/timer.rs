use std::sync::Arc;

use clap::Subcommand;
use phaselock_core::session::{BroadcastSink, FanoutSink, TracingSink};
use phaselock_core::{Config, Database, SessionManager, SessionStatus, StatusSnapshot};
use tokio::sync::broadcast::{self, error::RecvError};

use super::{print_json, print_json_line, CmdResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a session on a block
    Start {
        /// Block ID
        block_id: i64,
        /// Keep ticking and print one snapshot per line until the session stops running
        #[arg(long)]
        follow: bool,
    },
    /// Pause a running session
    Pause {
        /// Session ID
        session_id: i64,
    },
    /// Resume a paused session
    Resume {
        session_id: i64,
        #[arg(long)]
        follow: bool,
    },
    /// Rewind a session to its first phase and run it
    Restart {
        session_id: i64,
        #[arg(long)]
        follow: bool,
    },
    /// End the current phase early
    Skip {
        session_id: i64,
        #[arg(long)]
        follow: bool,
    },
    /// Stop a session
    Cancel { session_id: i64 },
    /// Print a session's status
    Status { session_id: i64 },
    /// Print the running or paused session, or null
    Active,
    /// Tick a running session from this process until it stops running
    Follow { session_id: i64 },
}

pub async fn run(action: TimerAction) -> CmdResult {
    let config = Config::load()?;
    let db = Arc::new(Database::open()?);
    let updates = BroadcastSink::default();
    let sink = FanoutSink::new()
        .with(Arc::new(updates.clone()))
        .with(Arc::new(TracingSink));
    let manager = SessionManager::builder_with_store(db)
        .sink(Arc::new(sink))
        .settings(config.timer.clone())
        .build();

    let result = dispatch(&manager, &updates, action).await;
    manager.shutdown().await;
    result
}

async fn dispatch(
    manager: &SessionManager,
    updates: &BroadcastSink,
    action: TimerAction,
) -> CmdResult {
    let (snapshot, follow) = match action {
        TimerAction::Start { block_id, follow } => (manager.start(block_id).await?, follow),
        TimerAction::Pause { session_id } => (manager.pause(session_id).await?, false),
        TimerAction::Resume { session_id, follow } => (manager.resume(session_id).await?, follow),
        TimerAction::Restart { session_id, follow } => {
            (manager.restart(session_id).await?, follow)
        }
        TimerAction::Skip { session_id, follow } => (manager.skip(session_id).await?, follow),
        TimerAction::Cancel { session_id } => (manager.cancel(session_id).await?, false),
        TimerAction::Status { session_id } => (manager.get_status(session_id).await?, false),
        TimerAction::Active => return print_json(&manager.get_active_session().await?),
        TimerAction::Follow { session_id } => (manager.attach(session_id).await?, true),
    };

    if !follow {
        return print_json(&snapshot);
    }
    // The first tick is a full period away, so nothing is missed by
    // subscribing after the operation returned.
    let rx = updates.subscribe();
    print_json_line(&snapshot)?;
    if snapshot.status == SessionStatus::Running {
        follow_session(manager, snapshot.session_id, rx).await?;
    }
    Ok(())
}

/// Print every snapshot of `session_id` until it leaves the running state.
/// Ctrl-C pauses the session so it does not sit "running" with no ticker.
async fn follow_session(
    manager: &SessionManager,
    session_id: i64,
    mut rx: broadcast::Receiver<StatusSnapshot>,
) -> CmdResult {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                let snapshot = manager.pause(session_id).await?;
                return print_json_line(&snapshot);
            }
            received = rx.recv() => {
                match received {
                    Ok(snapshot) if snapshot.session_id == session_id => {
                        print_json_line(&snapshot)?;
                        if snapshot.status != SessionStatus::Running {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status output fell behind");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}
