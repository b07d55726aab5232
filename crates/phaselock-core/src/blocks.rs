//! Block management.
//!
//! A block is stored as its four durations only; the phase sequence is
//! recomputed whenever a block is read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::storage::{Block, BlockStore};
use crate::timer::{compute_sequence, BlockId, BlockSpec, Sequence};

/// A stored block together with the phases it expands to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: Block,
    pub sequence: Sequence,
}

impl BlockView {
    fn new(block: Block) -> Self {
        let sequence = compute_sequence(&block.spec);
        Self { block, sequence }
    }
}

pub struct BlockService {
    store: Arc<dyn BlockStore>,
    defaults: BlockSpec,
}

impl BlockService {
    pub fn new(store: Arc<dyn BlockStore>, defaults: BlockSpec) -> Self {
        Self { store, defaults }
    }

    /// # Errors
    ///
    /// `Validation` if the total or work duration is below one minute.
    pub fn create_block(&self, spec: BlockSpec) -> Result<BlockView> {
        spec.validate()?;
        let block = self.store.insert_block(&spec)?;
        tracing::info!(
            block_id = block.id,
            total = spec.total_minutes,
            work_phases = spec.work_phase_count(),
            "block created"
        );
        Ok(BlockView::new(block))
    }

    pub fn create_default_block(&self) -> Result<BlockView> {
        self.create_block(self.defaults)
    }

    pub fn get_block(&self, id: BlockId) -> Result<BlockView> {
        self.store
            .load_block(id)?
            .map(BlockView::new)
            .ok_or_else(|| CoreError::block_not_found(id))
    }

    /// Oldest first.
    pub fn list_blocks(&self) -> Result<Vec<BlockView>> {
        Ok(self
            .store
            .list_blocks()?
            .into_iter()
            .map(BlockView::new)
            .collect())
    }

    /// The sequence `spec` would produce, without storing anything.
    pub fn preview_sequence(&self, spec: BlockSpec) -> Result<Sequence> {
        spec.validate()?;
        Ok(compute_sequence(&spec))
    }

    pub fn defaults(&self) -> BlockSpec {
        self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::timer::PhaseKind;

    fn service() -> BlockService {
        BlockService::new(Arc::new(MemoryStore::new()), BlockSpec::default())
    }

    #[test]
    fn create_returns_block_with_sequence() {
        let svc = service();
        let view = svc.create_block(BlockSpec::new(60, 25, 5, 0)).unwrap();
        assert_eq!(view.block.id, 1);
        assert_eq!(view.sequence.number_of_work_phases, 2);
        let kinds: Vec<_> = view.sequence.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, [PhaseKind::Work, PhaseKind::ShortBreak, PhaseKind::Work]);
    }

    #[test]
    fn create_rejects_invalid_spec() {
        let svc = service();
        let err = svc.create_block(BlockSpec::new(60, 0, 5, 0)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(svc.list_blocks().unwrap().is_empty());
    }

    #[test]
    fn default_block_uses_configured_defaults() {
        let svc = BlockService::new(Arc::new(MemoryStore::new()), BlockSpec::new(50, 20, 5, 0));
        let view = svc.create_default_block().unwrap();
        assert_eq!(view.block.spec, BlockSpec::new(50, 20, 5, 0));
        assert_eq!(svc.defaults().work_minutes, 20);
    }

    #[test]
    fn get_and_list() {
        let svc = service();
        let a = svc.create_default_block().unwrap();
        let b = svc.create_block(BlockSpec::new(30, 25, 5, 0)).unwrap();

        assert_eq!(svc.get_block(b.block.id).unwrap(), b);
        let ids: Vec<_> = svc.list_blocks().unwrap().iter().map(|v| v.block.id).collect();
        assert_eq!(ids, [a.block.id, b.block.id]);
        assert!(svc.get_block(42).unwrap_err().is_not_found());
    }

    #[test]
    fn preview_does_not_persist() {
        let svc = service();
        let seq = svc.preview_sequence(BlockSpec::default()).unwrap();
        assert_eq!(seq.total_phases(), 6);
        assert!(svc.list_blocks().unwrap().is_empty());
        assert!(svc.preview_sequence(BlockSpec::new(0, 25, 5, 0)).is_err());
    }

    #[test]
    fn view_serializes_flat() {
        let svc = service();
        let view = svc.create_default_block().unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["work_minutes"], 25);
        assert_eq!(json["sequence"]["number_of_work_phases"], 3);
    }
}
