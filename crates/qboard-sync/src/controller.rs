//! Per-view synchronization loop.
//!
//! A [`SyncController`] owns everything a board view mutates: the reconciler,
//! the receipt store, the render surface and all timers. It runs on a single
//! task; network calls are spawned and report back as events, so handlers
//! never interleave.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use qboard_core::{Item, ItemId, Snapshot, SubmitResponse, VoteResponse};
use qboard_storage::{BoardApi, FetchError, VoteReceiptStore};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SearchMode, SyncConfig};
use crate::policy::{MutationRejected, ReceiptAction, VoteIntent, VotePolicy};
use crate::rank::{FuzzyRanker, RankConfig};
use crate::reconcile::{Patch, Reconciler, RenderState};
use crate::surface::{Control, ControlState, Notice, RenderSurface};
use crate::SyncError;

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub exit_delay: Duration,
    pub search_mode: SearchMode,
    pub vote_policy: VotePolicy,
    pub rank: RankConfig,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for ControllerSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            debounce: config.debounce,
            exit_delay: config.exit_delay,
            search_mode: config.search_mode,
            vote_policy: config.vote_policy(),
            rank: config.rank_config(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Query(String),
    Refresh,
    Submit {
        content: String,
        reply: oneshot::Sender<Result<(), MutationRejected>>,
    },
    Vote {
        id: ItemId,
        intent: VoteIntent,
        reply: oneshot::Sender<Result<(), MutationRejected>>,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
    Initial,
    Poll,
    Filter,
    Manual,
    /// Follow-up read after a mutation; releases the control once applied.
    Refresh(Control),
}

#[derive(Debug)]
enum Event {
    Fetched {
        seq: u64,
        purpose: FetchPurpose,
        query: String,
        result: Result<Vec<Item>, FetchError>,
    },
    Submitted(Result<SubmitResponse, FetchError>),
    Voted {
        id: ItemId,
        receipt: ReceiptAction,
        result: Result<VoteResponse, FetchError>,
    },
}

/// Cloneable front door to a running [`SyncController`].
///
/// `submit` and `vote` resolve once the controller has accepted or rejected
/// the mutation locally; the network outcome shows up on the render surface.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
}

impl SyncHandle {
    pub async fn set_query(&self, text: impl Into<String>) -> Result<(), SyncError> {
        self.send(Command::Query(text.into())).await
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.send(Command::Refresh).await
    }

    pub async fn submit(&self, content: impl Into<String>) -> Result<(), SyncError> {
        let (reply, accepted) = oneshot::channel();
        self.send(Command::Submit {
            content: content.into(),
            reply,
        })
        .await?;
        Ok(accepted.await.map_err(|_| SyncError::Stopped)??)
    }

    pub async fn vote(&self, id: ItemId, intent: VoteIntent) -> Result<(), SyncError> {
        let (reply, accepted) = oneshot::channel();
        self.send(Command::Vote { id, intent, reply }).await?;
        Ok(accepted.await.map_err(|_| SyncError::Stopped)??)
    }

    pub async fn stop(&self) -> Result<(), SyncError> {
        self.send(Command::Stop).await
    }

    async fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::Stopped)
    }
}

pub struct SyncController {
    view_id: Uuid,
    settings: ControllerSettings,
    api: Arc<dyn BoardApi>,
    receipts: Box<dyn VoteReceiptStore>,
    surface: Box<dyn RenderSurface>,
    ranker: FuzzyRanker,
    reconciler: Reconciler,
    query: String,
    started: bool,
    poll_at: Option<Instant>,
    poll_outstanding: bool,
    debounce_at: Option<Instant>,
    in_flight: HashSet<Control>,
    issued_seq: u64,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl SyncController {
    pub fn new(
        settings: ControllerSettings,
        api: Arc<dyn BoardApi>,
        receipts: Box<dyn VoteReceiptStore>,
        surface: Box<dyn RenderSurface>,
    ) -> (Self, SyncHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();
        let controller = Self {
            view_id: Uuid::new_v4(),
            settings,
            api,
            receipts,
            surface,
            ranker: FuzzyRanker::new(settings.rank),
            reconciler: Reconciler::new(settings.exit_delay),
            query: String::new(),
            started: false,
            poll_at: None,
            poll_outstanding: false,
            debounce_at: None,
            in_flight: HashSet::new(),
            issued_seq: 0,
            commands,
            events_tx,
            events,
        };
        (
            controller,
            SyncHandle {
                commands: commands_tx,
            },
        )
    }

    pub fn view_id(&self) -> Uuid {
        self.view_id
    }

    pub fn render_state(&self) -> &RenderState {
        self.reconciler.state()
    }

    pub fn receipts(&self) -> &dyn VoteReceiptStore {
        &*self.receipts
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_polling(&self) -> bool {
        self.poll_at.is_some()
    }

    /// Issue the initial fetch and arm polling. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(view_id = %self.view_id, mode = %self.settings.search_mode, "board sync started");
        self.issue_fetch(FetchPurpose::Initial);
        self.schedule_poll();
    }

    /// Cancel every timer. Responses still in flight are ignored once `run` returns.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.poll_at = None;
        self.debounce_at = None;
        info!(view_id = %self.view_id, "board sync stopped");
    }

    /// Drive the view until [`SyncHandle::stop`] is called or every handle is dropped.
    pub async fn run(mut self) -> Self {
        self.start();
        loop {
            let purge_at = self.reconciler.next_purge_at();
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.handle_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = wait_until(self.debounce_at) => self.on_debounce(),
                _ = wait_until(self.poll_at) => self.on_poll_tick(),
                _ = wait_until(purge_at) => self.on_purge(),
            }
        }
        self.stop();
        self
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Query(text) => {
                self.query = text;
                self.debounce_at = Some(Instant::now() + self.settings.debounce);
            }
            Command::Refresh => self.issue_fetch(FetchPurpose::Manual),
            Command::Submit { content, reply } => {
                let outcome = self.begin_submit(content);
                if let Err(reason) = &outcome {
                    debug!(view_id = %self.view_id, %reason, "submit rejected");
                }
                let _ = reply.send(outcome);
            }
            Command::Vote { id, intent, reply } => {
                let outcome = self.begin_vote(id, intent);
                if let Err(reason) = &outcome {
                    debug!(view_id = %self.view_id, %id, %reason, "vote rejected");
                }
                let _ = reply.send(outcome);
            }
            Command::Stop => self.stop(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Fetched {
                seq,
                purpose,
                query,
                result,
            } => self.on_fetched(seq, purpose, &query, result),
            Event::Submitted(result) => self.on_submitted(result),
            Event::Voted {
                id,
                receipt,
                result,
            } => self.on_voted(id, receipt, result),
        }
    }

    fn schedule_poll(&mut self) {
        if self.started {
            self.poll_at = Some(Instant::now() + self.settings.poll_interval);
        }
    }

    fn on_poll_tick(&mut self) {
        self.poll_at = None;
        if !self.in_flight.is_empty() {
            return;
        }
        if self.poll_outstanding || !self.query.trim().is_empty() {
            debug!(view_id = %self.view_id, "poll skipped");
            self.schedule_poll();
            return;
        }
        self.poll_outstanding = true;
        self.issue_fetch(FetchPurpose::Poll);
    }

    fn on_debounce(&mut self) {
        self.debounce_at = None;
        self.issue_fetch(FetchPurpose::Filter);
    }

    fn on_purge(&mut self) {
        let patch = self.reconciler.purge_expired(Instant::now());
        if !patch.is_empty() {
            self.surface.apply(&patch);
        }
    }

    fn issue_fetch(&mut self, purpose: FetchPurpose) {
        self.issued_seq += 1;
        let seq = self.issued_seq;
        let query = self.query.trim().to_string();
        let server_query = match self.settings.search_mode {
            SearchMode::Server if !query.is_empty() => Some(query.clone()),
            _ => None,
        };
        debug!(view_id = %self.view_id, seq, ?purpose, query = %query, "fetch issued");

        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.list_items(server_query.as_deref()).await;
            let _ = events.send(Event::Fetched {
                seq,
                purpose,
                query,
                result,
            });
        });
    }

    fn on_fetched(
        &mut self,
        seq: u64,
        purpose: FetchPurpose,
        query: &str,
        result: Result<Vec<Item>, FetchError>,
    ) {
        if seq < self.issued_seq {
            debug!(view_id = %self.view_id, seq, latest = self.issued_seq, "stale response discarded");
        } else if purpose == FetchPurpose::Poll && !self.in_flight.is_empty() {
            debug!(view_id = %self.view_id, seq, "poll response discarded during mutation");
        } else {
            match result {
                Ok(items) => self.render(query, items),
                Err(err) => {
                    warn!(view_id = %self.view_id, ?purpose, error = %err, "fetch failed; keeping current render");
                }
            }
        }

        match purpose {
            FetchPurpose::Poll => {
                self.poll_outstanding = false;
                if self.in_flight.is_empty() {
                    self.schedule_poll();
                }
            }
            FetchPurpose::Refresh(control) => self.finish_mutation(control),
            FetchPurpose::Initial | FetchPurpose::Filter | FetchPurpose::Manual => {}
        }
    }

    fn render(&mut self, query: &str, items: Vec<Item>) {
        let snapshot = match self.settings.search_mode {
            SearchMode::Client => self.ranker.rank_snapshot(query, &items),
            SearchMode::Server => Snapshot::from(items),
        };
        let patch = self.reconciler.reconcile(&snapshot, Instant::now());
        if patch.is_empty() {
            return;
        }
        debug!(
            view_id = %self.view_id,
            ops = patch.len(),
            changes = patch.content_changes(),
            "applying patch"
        );
        self.surface.apply(&patch);

        let created = patch.created().map(|item| item.id).collect::<Vec<_>>();
        for id in created {
            let state = self.vote_control_state(id);
            self.surface.control_changed(Control::Vote(id), state);
        }
    }

    fn vote_control_state(&self, id: ItemId) -> ControlState {
        if self.in_flight.contains(&Control::Vote(id)) {
            ControlState::Busy
        } else if self.settings.vote_policy.locks_after_vote() && self.receipts.has_voted(id) {
            ControlState::Voted
        } else {
            ControlState::Enabled
        }
    }

    fn begin_mutation(&mut self, control: Control) {
        self.in_flight.insert(control);
        self.poll_at = None;
        self.surface.control_changed(control, ControlState::Busy);
    }

    fn finish_mutation(&mut self, control: Control) {
        if !self.in_flight.remove(&control) {
            return;
        }
        let state = match control {
            Control::Submit => ControlState::Enabled,
            Control::Vote(id) => self.vote_control_state(id),
        };
        self.surface.control_changed(control, state);
        if self.in_flight.is_empty() {
            self.schedule_poll();
        }
    }

    fn begin_submit(&mut self, content: String) -> Result<(), MutationRejected> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(MutationRejected::EmptyContent);
        }
        if self.in_flight.contains(&Control::Submit) {
            return Err(MutationRejected::InFlight(Control::Submit));
        }
        self.begin_mutation(Control::Submit);

        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.submit_item(&content).await;
            let _ = events.send(Event::Submitted(result));
        });
        Ok(())
    }

    fn on_submitted(&mut self, result: Result<SubmitResponse, FetchError>) {
        match result {
            Ok(response) => {
                info!(view_id = %self.view_id, id = ?response.id, "question submitted");
                self.query.clear();
                self.debounce_at = None;
                self.surface.input_cleared();
                self.issue_fetch(FetchPurpose::Refresh(Control::Submit));
            }
            Err(err) => {
                warn!(view_id = %self.view_id, error = %err, "submit failed");
                self.surface.notify(Notice::SubmitFailed {
                    reason: err.to_string(),
                });
                self.finish_mutation(Control::Submit);
            }
        }
    }

    fn begin_vote(&mut self, id: ItemId, intent: VoteIntent) -> Result<(), MutationRejected> {
        let control = Control::Vote(id);
        if self.in_flight.contains(&control) {
            return Err(MutationRejected::InFlight(control));
        }
        let resolved = self
            .settings
            .vote_policy
            .resolve(id, intent, self.receipts.has_voted(id))?;
        self.begin_mutation(control);

        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = api.vote(id, resolved.request).await;
            let _ = events.send(Event::Voted {
                id,
                receipt: resolved.receipt,
                result,
            });
        });
        Ok(())
    }

    fn on_voted(&mut self, id: ItemId, receipt: ReceiptAction, result: Result<VoteResponse, FetchError>) {
        match result {
            Ok(response) => {
                let stored = match receipt {
                    ReceiptAction::Record => self.receipts.record_vote(id),
                    ReceiptAction::Clear => self.receipts.clear_vote(id),
                    ReceiptAction::Keep => Ok(()),
                };
                if let Err(err) = stored {
                    warn!(view_id = %self.view_id, %id, error = %err, "vote receipt not saved");
                }
                info!(view_id = %self.view_id, %id, votes = response.votes, "vote accepted");
                if let Some(op) = self.reconciler.set_votes(id, response.votes) {
                    self.surface.apply(&Patch::from(op));
                }
                self.issue_fetch(FetchPurpose::Refresh(Control::Vote(id)));
            }
            Err(err) => {
                warn!(view_id = %self.view_id, %id, error = %err, "vote failed");
                self.finish_mutation(Control::Vote(id));
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
