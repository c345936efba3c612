//! Client-side synchronization for a question board view.

pub mod config;
pub mod controller;
pub mod policy;
pub mod rank;
pub mod reconcile;
pub mod surface;

use anyhow::Result;
use qboard_core::{ItemId, Snapshot, SubmitResponse, VoteResponse};
use qboard_storage::{BoardApi, FetchError, HttpBoardClient, VoteReceiptStore};
use thiserror::Error;
use tracing::warn;

pub use config::{SearchMode, SyncConfig};
pub use controller::{ControllerSettings, SyncController, SyncHandle};
pub use policy::{MutationRejected, ReceiptAction, ResolvedVote, VoteIntent, VotePolicy};
pub use rank::{FuzzyRanker, RankConfig, RankedItem};
pub use reconcile::{ItemPhase, Patch, Reconciler, RenderOp, RenderState};
pub use surface::{BoardView, Control, ControlState, Notice, RenderSurface, Row};

pub const CRATE_NAME: &str = "qboard-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to load questions")]
    FetchFailed(#[source] FetchError),
    #[error("request was not accepted by the server")]
    MutationFailed(#[source] FetchError),
    #[error(transparent)]
    Rejected(#[from] MutationRejected),
    #[error("board view is no longer running")]
    Stopped,
}

pub fn http_client_from_config(config: &SyncConfig) -> Result<HttpBoardClient> {
    HttpBoardClient::new(&config.base_url, &config.board, config.http_client_config())
}

/// One fetch, ordered the way a live view would show it.
pub async fn list_once(
    api: &dyn BoardApi,
    mode: SearchMode,
    ranker: &FuzzyRanker,
    query: &str,
) -> Result<Snapshot, SyncError> {
    let query = query.trim();
    match mode {
        SearchMode::Client => {
            let items = api.list_items(None).await.map_err(SyncError::FetchFailed)?;
            Ok(ranker.rank_snapshot(query, &items))
        }
        SearchMode::Server => {
            let items = api
                .list_items((!query.is_empty()).then_some(query))
                .await
                .map_err(SyncError::FetchFailed)?;
            Ok(Snapshot::from(items))
        }
    }
}

pub async fn submit_once(api: &dyn BoardApi, content: &str) -> Result<SubmitResponse, SyncError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(MutationRejected::EmptyContent.into());
    }
    api.submit_item(content)
        .await
        .map_err(SyncError::MutationFailed)
}

/// Gate a vote on the receipt store, send it, and persist the receipt change.
pub async fn vote_once(
    api: &dyn BoardApi,
    receipts: &mut dyn VoteReceiptStore,
    policy: VotePolicy,
    id: ItemId,
    intent: VoteIntent,
) -> Result<VoteResponse, SyncError> {
    let resolved = policy.resolve(id, intent, receipts.has_voted(id))?;
    let response = api
        .vote(id, resolved.request)
        .await
        .map_err(SyncError::MutationFailed)?;
    let stored = match resolved.receipt {
        ReceiptAction::Record => receipts.record_vote(id),
        ReceiptAction::Clear => receipts.clear_vote(id),
        ReceiptAction::Keep => Ok(()),
    };
    if let Err(err) = stored {
        warn!(%id, error = %err, "vote receipt not saved");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use qboard_core::{Item, VoteRequest};
    use qboard_storage::{FileReceiptStore, MemoryReceiptStore};

    #[derive(Default)]
    struct StaticBoard {
        queries: Mutex<Vec<Option<String>>>,
        votes: Mutex<Vec<VoteRequest>>,
    }

    #[async_trait]
    impl BoardApi for StaticBoard {
        async fn list_items(&self, query: Option<&str>) -> Result<Vec<Item>, FetchError> {
            self.queries.lock().unwrap().push(query.map(str::to_string));
            Ok(vec![
                Item::new(1, "Where is the pizza?", 2),
                Item::new(2, "Any tacos left?", 5),
            ])
        }

        async fn submit_item(&self, _content: &str) -> Result<SubmitResponse, FetchError> {
            Err(FetchError::HttpStatus {
                status: 400,
                url: "static://submit".to_string(),
            })
        }

        async fn vote(&self, id: ItemId, request: VoteRequest) -> Result<VoteResponse, FetchError> {
            self.votes.lock().unwrap().push(request);
            Ok(VoteResponse {
                votes: 3,
                id: Some(id),
            })
        }
    }

    #[tokio::test]
    async fn list_once_ranks_locally_in_client_mode() {
        let board = StaticBoard::default();
        let snapshot = list_once(&board, SearchMode::Client, &FuzzyRanker::default(), " pizza ")
            .await
            .unwrap();
        assert_eq!(snapshot.ids(), vec![ItemId(1)]);
        assert_eq!(*board.queries.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn list_once_forwards_query_in_server_mode() {
        let board = StaticBoard::default();
        let snapshot = list_once(&board, SearchMode::Server, &FuzzyRanker::default(), "pizza")
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        list_once(&board, SearchMode::Server, &FuzzyRanker::default(), "  ")
            .await
            .unwrap();
        assert_eq!(
            *board.queries.lock().unwrap(),
            vec![Some("pizza".to_string()), None]
        );
    }

    #[tokio::test]
    async fn submit_once_reports_rejections_and_failures() {
        let board = StaticBoard::default();
        assert!(matches!(
            submit_once(&board, "  ").await,
            Err(SyncError::Rejected(MutationRejected::EmptyContent))
        ));
        let err = submit_once(&board, "hello").await.unwrap_err();
        assert!(matches!(&err, SyncError::MutationFailed(inner) if inner.status() == Some(400)));
    }

    #[tokio::test]
    async fn vote_once_persists_receipts_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.json");
        let board = StaticBoard::default();

        let mut receipts = FileReceiptStore::open(&path).unwrap();
        let response = vote_once(&board, &mut receipts, VotePolicy::default(), ItemId(1), VoteIntent::up())
            .await
            .unwrap();
        assert_eq!(response.votes, 3);

        let mut reopened = FileReceiptStore::open(&path).unwrap();
        assert!(reopened.has_voted(ItemId(1)));
        let err = vote_once(&board, &mut reopened, VotePolicy::default(), ItemId(1), VoteIntent::up())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Rejected(MutationRejected::AlreadyVoted(ItemId(1)))
        ));
        assert_eq!(board.votes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vote_once_ignores_receipts_when_overriding() {
        let board = StaticBoard::default();
        let mut receipts = MemoryReceiptStore::with_votes([ItemId(2)]);
        vote_once(
            &board,
            &mut receipts,
            VotePolicy::for_board("testing"),
            ItemId(2),
            VoteIntent::up().with_amount(3).overriding(),
        )
        .await
        .unwrap();
        assert_eq!(board.votes.lock().unwrap()[0].amount, 3);
    }
}
