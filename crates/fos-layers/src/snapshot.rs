//! Paint snapshots
//!
//! Handles to raster snapshots recorded by the remote target.

use crate::protocol::{Rect, SnapshotId};
use crate::target::Target;

/// Remote paint snapshot
#[derive(Debug, Clone)]
pub struct PaintProfilerSnapshot {
    target: Target,
    id: SnapshotId,
}

impl PaintProfilerSnapshot {
    pub fn new(target: Target, id: SnapshotId) -> Self {
        Self { target, id }
    }

    pub fn id(&self) -> &SnapshotId {
        &self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Free the snapshot on the remote side
    pub fn release(self) {
        tracing::debug!("Releasing snapshot {}", self.id.0);
        self.target.layer_tree_agent().release_snapshot(&self.id);
    }
}

/// Snapshot together with the layer-space rectangle it covers
#[derive(Debug, Clone)]
pub struct SnapshotWithRect {
    pub rect: Rect,
    pub snapshot: PaintProfilerSnapshot,
}
