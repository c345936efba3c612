//! Core domain model and wire types for the question board client.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "qboard-core";

/// Board slug on which repeated and weighted votes are allowed.
pub const TESTING_BOARD: &str = "testing";

/// Server-assigned, stable identifier of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A question as reported by the server. `votes` is authoritative and never computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub content: String,
    #[serde(default)]
    pub votes: u64,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, content: impl Into<String>, votes: u64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            votes,
        }
    }
}

/// Ordered result of one fetch, optionally re-ordered by ranking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Vec<Item>);

impl Snapshot {
    pub fn new(items: Vec<Item>) -> Self {
        Self(items)
    }

    pub fn items(&self) -> &[Item] {
        &self.0
    }

    pub fn into_items(self) -> Vec<Item> {
        self.0
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.0.iter().map(|item| item.id).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.0.iter()
    }
}

impl From<Vec<Item>> for Snapshot {
    fn from(items: Vec<Item>) -> Self {
        Self(items)
    }
}

impl FromIterator<Item> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Body of `POST /api/{board}/questions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub content: String,
}

/// Response to a submission. Servers may answer with an empty body, so every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<ItemId>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    #[default]
    Up,
    Down,
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Body of `POST /api/{board}/questions/{id}/vote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    #[serde(default)]
    pub direction: VoteDirection,
    #[serde(default = "default_vote_amount")]
    pub amount: u32,
}

fn default_vote_amount() -> u32 {
    1
}

impl Default for VoteRequest {
    fn default() -> Self {
        Self {
            direction: VoteDirection::Up,
            amount: default_vote_amount(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub votes: u64,
    #[serde(default)]
    pub id: Option<ItemId>,
}

/// Vote magnitudes selectable with keyboard modifiers on the testing board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAmount {
    Single,
    Small,
    Large,
    Huge,
}

impl VoteAmount {
    /// Shift gives 3, Ctrl (or Cmd) gives 20, both give 100.
    pub fn from_modifiers(shift: bool, ctrl: bool) -> Self {
        match (shift, ctrl) {
            (true, true) => Self::Huge,
            (false, true) => Self::Large,
            (true, false) => Self::Small,
            (false, false) => Self::Single,
        }
    }

    pub fn value(self) -> u32 {
        match self {
            Self::Single => 1,
            Self::Small => 3,
            Self::Large => 20,
            Self::Huge => 100,
        }
    }
}

pub fn is_testing_board(board: &str) -> bool {
    board == TESTING_BOARD
}
