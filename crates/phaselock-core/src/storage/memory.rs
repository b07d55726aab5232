//! In-memory block and session storage.
//!
//! Same semantics as [`super::Database`], without a file. Used by tests and
//! by callers that do not need sessions to outlive the process.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{Block, BlockStore, SessionStore};
use crate::error::{CoreError, DatabaseError, Result};
use crate::timer::{BlockId, BlockSpec, SessionId, SessionState};

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<BlockId, Block>,
    sessions: BTreeMap<SessionId, SessionState>,
    next_block_id: BlockId,
    next_session_id: SessionId,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("memory store mutex poisoned".into()).into())
    }
}

impl BlockStore for MemoryStore {
    fn insert_block(&self, spec: &BlockSpec) -> Result<Block> {
        let mut tables = self.tables()?;
        tables.next_block_id += 1;
        let block = Block {
            id: tables.next_block_id,
            spec: *spec,
            created_at: Utc::now(),
        };
        tables.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    fn load_block(&self, id: BlockId) -> Result<Option<Block>> {
        Ok(self.tables()?.blocks.get(&id).cloned())
    }

    fn list_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.tables()?.blocks.values().cloned().collect())
    }
}

impl SessionStore for MemoryStore {
    fn insert_session(&self, session: &SessionState) -> Result<SessionId> {
        let mut tables = self.tables()?;
        if !tables.blocks.contains_key(&session.block_id) {
            return Err(CoreError::block_not_found(session.block_id));
        }
        tables.next_session_id += 1;
        let id = tables.next_session_id;
        let mut stored = session.clone();
        stored.id = id;
        tables.sessions.insert(id, stored);
        Ok(id)
    }

    fn save_session(&self, session: &SessionState) -> Result<()> {
        let mut tables = self.tables()?;
        match tables.sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(())
            }
            None => Err(CoreError::session_not_found(session.id)),
        }
    }

    fn load_session(&self, id: SessionId) -> Result<Option<SessionState>> {
        Ok(self.tables()?.sessions.get(&id).cloned())
    }

    fn find_active_session(&self) -> Result<Option<SessionState>> {
        Ok(self
            .tables()?
            .sessions
            .values()
            .filter(|s| s.status.is_active())
            .max_by_key(|s| (s.started_at, s.id))
            .cloned())
    }
}
