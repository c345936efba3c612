//! Local vote gating against the receipt store.

use qboard_core::{is_testing_board, ItemId, VoteDirection, VoteRequest};
use thiserror::Error;

use crate::surface::Control;

/// Reasons a mutation is refused before any request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MutationRejected {
    #[error("question content is empty")]
    EmptyContent,
    #[error("{0} already has a request in flight")]
    InFlight(Control),
    #[error("already voted for question {0}")]
    AlreadyVoted(ItemId),
    #[error("no recorded vote to withdraw for question {0}")]
    NotVoted(ItemId),
}

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteIntent {
    pub direction: VoteDirection,
    pub amount: u32,
    /// Ignore the receipt store entirely (testing board only).
    pub override_receipt: bool,
}

impl Default for VoteIntent {
    fn default() -> Self {
        Self::up()
    }
}

impl VoteIntent {
    pub fn up() -> Self {
        Self {
            direction: VoteDirection::Up,
            amount: 1,
            override_receipt: false,
        }
    }

    pub fn down() -> Self {
        Self {
            direction: VoteDirection::Down,
            ..Self::up()
        }
    }

    pub fn with_amount(self, amount: u32) -> Self {
        Self {
            amount: amount.max(1),
            ..self
        }
    }

    pub fn overriding(self) -> Self {
        Self {
            override_receipt: true,
            ..self
        }
    }
}

/// Receipt bookkeeping to perform once the server accepts the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptAction {
    Record,
    Clear,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVote {
    pub request: VoteRequest,
    pub receipt: ReceiptAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VotePolicy {
    pub allow_override: bool,
}

impl VotePolicy {
    pub fn for_board(board: &str) -> Self {
        Self {
            allow_override: is_testing_board(board),
        }
    }

    /// Decide whether a vote may be sent, and with which body.
    pub fn resolve(
        &self,
        id: ItemId,
        intent: VoteIntent,
        has_receipt: bool,
    ) -> Result<ResolvedVote, MutationRejected> {
        if intent.override_receipt && self.allow_override {
            return Ok(ResolvedVote {
                request: VoteRequest {
                    direction: intent.direction,
                    amount: intent.amount.max(1),
                },
                receipt: ReceiptAction::Keep,
            });
        }

        let single = |direction| VoteRequest {
            direction,
            amount: 1,
        };
        match (intent.direction, has_receipt) {
            (VoteDirection::Up, false) => Ok(ResolvedVote {
                request: single(VoteDirection::Up),
                receipt: ReceiptAction::Record,
            }),
            (VoteDirection::Up, true) => Err(MutationRejected::AlreadyVoted(id)),
            (VoteDirection::Down, true) => Ok(ResolvedVote {
                request: single(VoteDirection::Down),
                receipt: ReceiptAction::Clear,
            }),
            (VoteDirection::Down, false) => Err(MutationRejected::NotVoted(id)),
        }
    }

    /// Whether a row's vote control should stay disabled for a receipt holder.
    pub fn locks_after_vote(&self) -> bool {
        !self.allow_override
    }
}
