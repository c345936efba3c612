//! Incremental reconciliation of the rendered item list against fresh snapshots.
//!
//! The reconciler never touches a renderer. It keeps its own [`RenderState`]
//! and emits a [`Patch`]: an ordered list of [`RenderOp`]s that, applied in
//! sequence, turn the previously rendered list into the snapshot's list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use qboard_core::{Item, ItemId, Snapshot};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOp {
    /// Insert a new row at `index` of the present rows and run its entrance.
    Create { item: Item, index: usize },
    /// The displayed count changed; the renderer refreshes its vote effect.
    UpdateVotes {
        id: ItemId,
        previous: u64,
        votes: u64,
    },
    /// Move an existing present row to `index`.
    Move { id: ItemId, index: usize },
    /// Row left the snapshot; it stays attached while its exit runs.
    BeginRemoval { id: ItemId },
    /// Row reappeared during its exit and goes back to `index`.
    CancelRemoval { id: ItemId, index: usize },
    /// Exit finished; the row is gone.
    Detach { id: ItemId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub ops: Vec<RenderOp>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn created(&self) -> impl Iterator<Item = &Item> {
        self.ops.iter().filter_map(|op| match op {
            RenderOp::Create { item, .. } => Some(item),
            _ => None,
        })
    }

    /// Count of ops that add, update or remove rows (moves excluded).
    pub fn content_changes(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !matches!(op, RenderOp::Move { .. }))
            .count()
    }
}

impl From<RenderOp> for Patch {
    fn from(op: RenderOp) -> Self {
        Self { ops: vec![op] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    Present,
    Removing { since: Instant },
}

#[derive(Debug, Clone)]
struct RenderEntry {
    votes: u64,
    phase: ItemPhase,
}

/// What is currently displayed, keyed by item id.
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    entries: HashMap<ItemId, RenderEntry>,
    order: Vec<ItemId>,
}

impl RenderState {
    /// Present ids in display order; rows mid-exit are excluded.
    pub fn visible_ids(&self) -> &[ItemId] {
        &self.order
    }

    pub fn phase(&self, id: ItemId) -> Option<ItemPhase> {
        self.entries.get(&id).map(|entry| entry.phase)
    }

    pub fn votes(&self, id: ItemId) -> Option<u64> {
        self.entries.get(&id).map(|entry| entry.votes)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn removing_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.phase, ItemPhase::Removing { .. }))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    exit_delay: Duration,
    state: RenderState,
}

impl Reconciler {
    pub fn new(exit_delay: Duration) -> Self {
        Self {
            exit_delay,
            state: RenderState::default(),
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn exit_delay(&self) -> Duration {
        self.exit_delay
    }

    /// Diff the current render state against `snapshot`.
    ///
    /// Present rows end up in snapshot order, rows missing from the snapshot
    /// start their exit, and a row mid-exit that reappears is brought back
    /// instead of being created twice. Reconciling the same snapshot again
    /// yields an empty patch.
    pub fn reconcile(&mut self, snapshot: &Snapshot, now: Instant) -> Patch {
        let mut ops = Vec::new();
        let mut seen = HashSet::with_capacity(snapshot.len());
        let mut working = self.state.order.clone();
        let mut index = 0usize;

        for item in snapshot {
            if !seen.insert(item.id) {
                debug!(id = %item.id, "duplicate id in snapshot ignored");
                continue;
            }

            match self.state.entries.get_mut(&item.id) {
                Some(entry) => {
                    if let ItemPhase::Removing { .. } = entry.phase {
                        entry.phase = ItemPhase::Present;
                        working.insert(index, item.id);
                        ops.push(RenderOp::CancelRemoval { id: item.id, index });
                    } else if let Some(pos) = working.iter().position(|id| *id == item.id) {
                        if pos != index {
                            working.remove(pos);
                            working.insert(index, item.id);
                            ops.push(RenderOp::Move { id: item.id, index });
                        }
                    }

                    if entry.votes != item.votes {
                        ops.push(RenderOp::UpdateVotes {
                            id: item.id,
                            previous: entry.votes,
                            votes: item.votes,
                        });
                        entry.votes = item.votes;
                    }
                }
                None => {
                    self.state.entries.insert(
                        item.id,
                        RenderEntry {
                            votes: item.votes,
                            phase: ItemPhase::Present,
                        },
                    );
                    working.insert(index, item.id);
                    ops.push(RenderOp::Create {
                        item: item.clone(),
                        index,
                    });
                }
            }
            index += 1;
        }

        // working[..index] now mirrors the snapshot; the tail has left it.
        for id in working.drain(index..) {
            if let Some(entry) = self.state.entries.get_mut(&id) {
                entry.phase = ItemPhase::Removing { since: now };
            }
            ops.push(RenderOp::BeginRemoval { id });
        }
        self.state.order = working;

        Patch { ops }
    }

    /// Apply an authoritative count from a vote response.
    pub fn set_votes(&mut self, id: ItemId, votes: u64) -> Option<RenderOp> {
        let entry = self.state.entries.get_mut(&id)?;
        if entry.votes == votes {
            return None;
        }
        let previous = entry.votes;
        entry.votes = votes;
        Some(RenderOp::UpdateVotes {
            id,
            previous,
            votes,
        })
    }

    /// When the earliest pending exit completes, if any.
    pub fn next_purge_at(&self) -> Option<Instant> {
        self.state
            .entries
            .values()
            .filter_map(|entry| match entry.phase {
                ItemPhase::Removing { since } => Some(since + self.exit_delay),
                ItemPhase::Present => None,
            })
            .min()
    }

    /// Detach every row whose exit delay has elapsed and forget it.
    pub fn purge_expired(&mut self, now: Instant) -> Patch {
        let mut expired = self
            .state
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.phase {
                ItemPhase::Removing { since } if since + self.exit_delay <= now => Some(*id),
                _ => None,
            })
            .collect::<Vec<_>>();
        expired.sort();

        let mut ops = Vec::with_capacity(expired.len());
        for id in expired {
            self.state.entries.remove(&id);
            ops.push(RenderOp::Detach { id });
        }
        Patch { ops }
    }
}
