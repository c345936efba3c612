//! Rendering seam between the sync engine and whatever displays the board.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use qboard_core::{Item, ItemId};

use crate::reconcile::{Patch, RenderOp};

/// A user-facing control that can trigger a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Submit,
    Vote(ItemId),
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit => f.write_str("submit"),
            Self::Vote(id) => write!(f, "vote:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Enabled,
    /// A mutation from this control is in flight.
    Busy,
    /// This browser already voted; the control stays disabled.
    Voted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SubmitFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmitFailed { reason } => write!(f, "Failed to submit question: {reason}"),
        }
    }
}

pub trait RenderSurface: Send {
    /// Apply reconciler output, op by op, in order.
    fn apply(&mut self, patch: &Patch);

    fn control_changed(&mut self, _control: Control, _state: ControlState) {}

    /// The input box was emptied after a successful submission.
    fn input_cleared(&mut self) {}

    fn notify(&mut self, _notice: Notice) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: ItemId,
    pub content: String,
    pub votes: u64,
}

impl From<&Item> for Row {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            content: item.content.clone(),
            votes: item.votes,
        }
    }
}

/// In-memory materialization of the rendered board.
#[derive(Debug, Clone, Default)]
pub struct BoardView {
    rows: Vec<Row>,
    exiting: Vec<Row>,
    controls: HashMap<Control, ControlState>,
    notices: Vec<Notice>,
    input_clears: usize,
    vote_effects: usize,
}

impl BoardView {
    pub fn apply_patch(&mut self, patch: &Patch) {
        for op in &patch.ops {
            match op {
                RenderOp::Create { item, index } => {
                    let index = (*index).min(self.rows.len());
                    self.rows.insert(index, Row::from(item));
                }
                RenderOp::UpdateVotes { id, votes, .. } => {
                    if let Some(row) = self
                        .rows
                        .iter_mut()
                        .chain(self.exiting.iter_mut())
                        .find(|row| row.id == *id)
                    {
                        row.votes = *votes;
                        self.vote_effects += 1;
                    }
                }
                RenderOp::Move { id, index } => {
                    if let Some(pos) = self.rows.iter().position(|row| row.id == *id) {
                        let row = self.rows.remove(pos);
                        let index = (*index).min(self.rows.len());
                        self.rows.insert(index, row);
                    }
                }
                RenderOp::BeginRemoval { id } => {
                    if let Some(pos) = self.rows.iter().position(|row| row.id == *id) {
                        self.exiting.push(self.rows.remove(pos));
                    }
                }
                RenderOp::CancelRemoval { id, index } => {
                    if let Some(pos) = self.exiting.iter().position(|row| row.id == *id) {
                        let row = self.exiting.remove(pos);
                        let index = (*index).min(self.rows.len());
                        self.rows.insert(index, row);
                    }
                }
                RenderOp::Detach { id } => {
                    self.exiting.retain(|row| row.id != *id);
                }
            }
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn visible_ids(&self) -> Vec<ItemId> {
        self.rows.iter().map(|row| row.id).collect()
    }

    pub fn exiting_ids(&self) -> Vec<ItemId> {
        self.exiting.iter().map(|row| row.id).collect()
    }

    pub fn votes(&self, id: ItemId) -> Option<u64> {
        self.rows
            .iter()
            .chain(self.exiting.iter())
            .find(|row| row.id == id)
            .map(|row| row.votes)
    }

    pub fn control(&self, control: Control) -> ControlState {
        self.controls.get(&control).copied().unwrap_or_default()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn input_clears(&self) -> usize {
        self.input_clears
    }

    pub fn vote_effects(&self) -> usize {
        self.vote_effects
    }

    /// Plain-text rendering, one row per line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let marker = match self.control(Control::Vote(row.id)) {
                ControlState::Voted => '*',
                ControlState::Busy => '~',
                ControlState::Enabled => ' ',
            };
            let _ = writeln!(out, "{marker}{:>5}  #{:<5} {}", row.votes, row.id, row.content);
        }
        out
    }
}

impl RenderSurface for BoardView {
    fn apply(&mut self, patch: &Patch) {
        self.apply_patch(patch);
    }

    fn control_changed(&mut self, control: Control, state: ControlState) {
        self.controls.insert(control, state);
    }

    fn input_cleared(&mut self) {
        self.input_clears += 1;
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_are_applied_sequentially() {
        let mut view = BoardView::default();
        view.apply_patch(&Patch {
            ops: vec![
                RenderOp::Create {
                    item: Item::new(1, "pizza", 2),
                    index: 0,
                },
                RenderOp::Create {
                    item: Item::new(2, "tacos", 5),
                    index: 0,
                },
                RenderOp::UpdateVotes {
                    id: ItemId(1),
                    previous: 2,
                    votes: 3,
                },
                RenderOp::Move {
                    id: ItemId(1),
                    index: 0,
                },
                RenderOp::BeginRemoval { id: ItemId(2) },
            ],
        });
        assert_eq!(view.visible_ids(), vec![ItemId(1)]);
        assert_eq!(view.exiting_ids(), vec![ItemId(2)]);
        assert_eq!(view.votes(ItemId(1)), Some(3));
        assert_eq!(view.vote_effects(), 1);

        view.apply_patch(&RenderOp::Detach { id: ItemId(2) }.into());
        assert!(view.exiting_ids().is_empty());
    }

    #[test]
    fn text_rendering_marks_voted_rows() {
        let mut view = BoardView::default();
        view.apply_patch(&RenderOp::Create {
            item: Item::new(7, "tacos", 5),
            index: 0,
        }
        .into());
        view.control_changed(Control::Vote(ItemId(7)), ControlState::Voted);
        assert_eq!(view.render_text(), "*    5  #7     tacos\n");
    }
}
