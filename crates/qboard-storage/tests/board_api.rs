use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qboard_core::{Item, ItemId, NewItem, VoteDirection, VoteRequest, VoteResponse};
use qboard_storage::{BackoffPolicy, BoardApi, FetchError, HttpBoardClient, HttpClientConfig};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Default)]
struct StubBoard {
    items: Vec<(String, Item)>,
    next_id: u64,
    list_calls: usize,
    last_vote: Option<VoteRequest>,
}

type Shared = Arc<Mutex<StubBoard>>;

async fn list(
    State(state): State<Shared>,
    Path(board): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Item>>, StatusCode> {
    let mut stub = state.lock().await;
    stub.list_calls += 1;
    if board == "broken" {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let needle = params.get("q").map(|q| q.to_lowercase());
    let mut items = stub
        .items
        .iter()
        .filter(|(b, _)| *b == board)
        .map(|(_, item)| item.clone())
        .filter(|item| match &needle {
            Some(q) => item.content.to_lowercase().contains(q),
            None => true,
        })
        .collect::<Vec<_>>();
    items.sort_by(|a, b| b.votes.cmp(&a.votes));
    Ok(Json(items))
}

async fn create(
    State(state): State<Shared>,
    Path(board): Path<String>,
    Json(body): Json<NewItem>,
) -> (StatusCode, Json<serde_json::Value>) {
    if body.content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Content is required"})),
        );
    }
    let mut stub = state.lock().await;
    stub.next_id += 1;
    let id = stub.next_id;
    stub.items.push((board, Item::new(id, body.content, 0)));
    (
        StatusCode::CREATED,
        Json(serde_json::json!({"id": id, "status": "success"})),
    )
}

async fn vote(
    State(state): State<Shared>,
    Path((_board, id)): Path<(String, u64)>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, StatusCode> {
    let mut stub = state.lock().await;
    stub.last_vote = Some(req);
    let item = stub
        .items
        .iter_mut()
        .map(|(_, item)| item)
        .find(|item| item.id == ItemId(id))
        .ok_or(StatusCode::NOT_FOUND)?;
    item.votes = match req.direction {
        VoteDirection::Up => item.votes + u64::from(req.amount),
        VoteDirection::Down => item.votes.saturating_sub(u64::from(req.amount)),
    };
    Ok(Json(VoteResponse {
        votes: item.votes,
        id: Some(item.id),
    }))
}

async fn recent() -> Json<Vec<String>> {
    Json(vec!["general".to_string(), "testing".to_string()])
}

async fn spawn_stub() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/api/boards/recent", get(recent))
        .route("/api/{board}/questions", get(list).post(create))
        .route("/api/{board}/questions/{id}/vote", post(vote))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn client(base: &str, board: &str) -> HttpBoardClient {
    client_with_backoff(
        base,
        board,
        BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    )
}

fn client_with_backoff(base: &str, board: &str, backoff: BackoffPolicy) -> HttpBoardClient {
    HttpBoardClient::new(
        base,
        board,
        HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("qboard-test".into()),
            backoff,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn submit_then_list_round_trip() {
    let (base, _state) = spawn_stub().await;
    let api = client(&base, "general");

    let first = api.submit_item("pizza").await.unwrap();
    api.submit_item("tacos").await.unwrap();
    assert_eq!(first.id, Some(ItemId(1)));
    assert_eq!(first.status.as_deref(), Some("success"));

    let items = api.list_items(None).await.unwrap();
    assert_eq!(
        items.iter().map(|i| i.content.as_str()).collect::<Vec<_>>(),
        vec!["pizza", "tacos"]
    );

    let other = client(&base, "other");
    assert!(other.list_items(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn query_is_forwarded_to_server() {
    let (base, _state) = spawn_stub().await;
    let api = client(&base, "general");
    api.submit_item("Apple").await.unwrap();
    api.submit_item("Application").await.unwrap();
    api.submit_item("Banana").await.unwrap();

    let found = api.list_items(Some(" app ")).await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|i| i.content.starts_with("App")));
}

#[tokio::test]
async fn vote_returns_authoritative_count() {
    let (base, state) = spawn_stub().await;
    let api = client(&base, "general");
    api.submit_item("pizza").await.unwrap();

    let resp = api.vote(ItemId(1), VoteRequest::default()).await.unwrap();
    assert_eq!(resp.votes, 1);
    assert_eq!(
        state.lock().await.last_vote,
        Some(VoteRequest {
            direction: VoteDirection::Up,
            amount: 1
        })
    );

    let resp = api
        .vote(
            ItemId(1),
            VoteRequest {
                direction: VoteDirection::Down,
                amount: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(resp.votes, 0);
}

#[tokio::test]
async fn vote_on_missing_item_is_a_status_error() {
    let (base, _state) = spawn_stub().await;
    let api = client(&base, "general");
    let err = api.vote(ItemId(999), VoteRequest::default()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn rejected_submission_is_not_retried() {
    let (base, state) = spawn_stub().await;
    let api = client(&base, "general");
    let err = api.submit_item("").await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 400, .. }));
    assert!(state.lock().await.items.is_empty());
}

#[tokio::test]
async fn reads_retry_server_errors_then_fail() {
    let (base, state) = spawn_stub().await;
    let api = client(&base, "broken");
    let err = api.list_items(None).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(state.lock().await.list_calls, 3);
}

#[tokio::test]
async fn reads_without_backoff_fail_on_first_error() {
    let (base, state) = spawn_stub().await;
    let api = client_with_backoff(&base, "broken", BackoffPolicy::none());
    let err = api.list_items(None).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(state.lock().await.list_calls, 1);
}

#[tokio::test]
async fn recent_boards_lists_slugs() {
    let (base, _state) = spawn_stub().await;
    let api = client(&base, "general");
    assert_eq!(
        api.recent_boards().await.unwrap(),
        vec!["general".to_string(), "testing".to_string()]
    );
}
