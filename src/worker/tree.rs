//! Delegation-tree progress tracking.
//!
//! Every spawned worker is a node in a strict tree. The tracker holds the
//! flattened node list plus the currently active worker id and feeds
//! `workerUpdate` events; the UI renders it, the runtime never reads it back.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: String,
    pub task: String,
    pub status: WorkerStatus,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Snapshot of the whole tree, suitable for a `workerUpdate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkerProgress {
    pub workers: Vec<WorkerNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
}

/// Mutable tree state, shared across the runners of one delegation tree.
#[derive(Debug, Default)]
pub struct WorkerTracker {
    nodes: Vec<WorkerNode>,
    active: Option<String>,
}

impl WorkerTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node by id, preserving first-seen order.
    pub fn upsert(&mut self, node: WorkerNode) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    pub fn set_status(&mut self, id: &str, status: WorkerStatus) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) {
            node.status = status;
        }
    }

    pub fn set_active(&mut self, id: Option<String>) {
        self.active = id;
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&WorkerNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkerProgress {
        WorkerProgress {
            workers: self.nodes.clone(),
            active: self.active.clone(),
        }
    }

    /// Replace the tracked state with an externally supplied snapshot.
    ///
    /// Returns `true` when anything changed. Applying the same payload twice
    /// is a no-op, so callers can re-deliver progress without churn.
    pub fn update_from_progress(&mut self, progress: &WorkerProgress) -> bool {
        if self.nodes == progress.workers && self.active == progress.active {
            return false;
        }
        self.nodes = progress.workers.clone();
        self.active = progress.active.clone();
        true
    }
}
