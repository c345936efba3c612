use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qboard_core::{ItemId, VoteAmount};
use qboard_storage::{FileReceiptStore, VoteReceiptStore};
use qboard_sync::{
    http_client_from_config, list_once, submit_once, vote_once, BoardView, Control, ControlState,
    ControllerSettings, FuzzyRanker, Notice, Patch, Reconciler, RenderSurface, SearchMode,
    SyncConfig, SyncController, SyncError, SyncHandle, VoteIntent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "qboard")]
#[command(about = "Question board command-line client")]
struct Cli {
    /// Server root, e.g. http://127.0.0.1:5000
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[arg(long, global = true)]
    board: Option<String>,
    /// Vote receipt file
    #[arg(long, global = true)]
    receipts: Option<PathBuf>,
    /// `client` ranks locally, `server` forwards the query
    #[arg(long, global = true)]
    search_mode: Option<SearchMode>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Live board view; read queries and /commands from stdin
    Watch {
        /// Initial filter
        #[arg(long)]
        query: Option<String>,
    },
    List {
        #[arg(long, default_value = "")]
        query: String,
    },
    Submit {
        content: String,
    },
    Vote {
        id: u64,
        /// Withdraw a previous vote
        #[arg(long)]
        down: bool,
        /// Vote weight (testing board only, implies --force)
        #[arg(long)]
        amount: Option<u32>,
        /// Ignore local receipts (testing board only)
        #[arg(long)]
        force: bool,
    },
    /// Recently active boards
    Boards,
}

impl Cli {
    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(board) = &self.board {
            config.board = board.clone();
        }
        if let Some(receipts) = &self.receipts {
            config.receipts_path = receipts.clone();
        }
        if let Some(mode) = self.search_mode {
            config.search_mode = mode;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(default_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    info!(board = %config.board, base_url = %config.base_url, mode = %config.search_mode, "qboard starting");

    match cli.command.unwrap_or(Commands::Watch { query: None }) {
        Commands::Watch { query } => watch(config, query).await?,
        Commands::List { query } => list(&config, &query).await?,
        Commands::Submit { content } => {
            let client = http_client_from_config(&config)?;
            let response = submit_once(&client, &content).await?;
            match response.id {
                Some(id) => println!("submitted question #{id}"),
                None => println!("submitted question"),
            }
        }
        Commands::Vote {
            id,
            down,
            amount,
            force,
        } => {
            let client = http_client_from_config(&config)?;
            let mut receipts = open_receipts(&config)?;
            let mut intent = if down {
                VoteIntent::down()
            } else {
                VoteIntent::up()
            };
            if let Some(amount) = amount {
                intent = intent.with_amount(amount).overriding();
            }
            if force {
                intent = intent.overriding();
            }
            let response =
                vote_once(&client, &mut receipts, config.vote_policy(), ItemId(id), intent).await?;
            println!("question #{id} now has {} votes", response.votes);
        }
        Commands::Boards => {
            let client = http_client_from_config(&config)?;
            for board in client.recent_boards().await? {
                println!("{board}");
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` when it parses, `info` otherwise.
fn default_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn open_receipts(config: &SyncConfig) -> Result<FileReceiptStore> {
    FileReceiptStore::open(&config.receipts_path)
        .with_context(|| format!("opening vote receipts at {}", config.receipts_path.display()))
}

async fn list(config: &SyncConfig, query: &str) -> Result<()> {
    let client = http_client_from_config(config)?;
    let ranker = FuzzyRanker::new(config.rank_config());
    let snapshot = list_once(&client, config.search_mode, &ranker, query).await?;
    if snapshot.is_empty() {
        println!("no questions on {}", config.board);
        return Ok(());
    }

    let receipts = open_receipts(config)?;
    let mut view = BoardView::default();
    view.apply_patch(&Reconciler::new(config.exit_delay).reconcile(&snapshot, Instant::now()));
    if config.vote_policy().locks_after_vote() {
        for id in snapshot.ids() {
            if receipts.has_voted(id) {
                view.control_changed(Control::Vote(id), ControlState::Voted);
            }
        }
    }
    print!("{}", view.render_text());
    Ok(())
}

async fn watch(config: SyncConfig, query: Option<String>) -> Result<()> {
    let client = http_client_from_config(&config)?;
    let receipts = open_receipts(&config)?;
    let surface = TerminalSurface {
        board: config.board.clone(),
        view: BoardView::default(),
    };
    let (controller, handle) = SyncController::new(
        ControllerSettings::from(&config),
        Arc::new(client),
        Box::new(receipts),
        Box::new(surface),
    );
    let task = tokio::spawn(controller.run());
    if let Some(query) = query {
        handle.set_query(query).await?;
    }

    eprintln!("type to filter; /submit <text>, /vote <id> [shift] [ctrl], /unvote <id>, /refresh, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };
        match dispatch(&handle, input).await {
            Ok(true) => {}
            Ok(false) | Err(SyncError::Stopped) => break,
            Err(err) => eprintln!("{err}"),
        }
    }

    let _ = handle.stop().await;
    let controller = task.await.context("board view task panicked")?;
    info!(view_id = %controller.view_id(), "board view closed");
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Input {
    Query(String),
    Submit(String),
    Vote { id: ItemId, intent: VoteIntent },
    Refresh,
    Quit,
}

/// Plain text sets the filter; a leading `/` starts a command.
fn parse_input(line: &str) -> Result<Input, String> {
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Ok(Input::Query(line.to_string()));
    };
    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();
    match command {
        "submit" => {
            let content = rest
                .split_once(char::is_whitespace)
                .map(|(_, content)| content.trim())
                .unwrap_or_default();
            Ok(Input::Submit(content.to_string()))
        }
        "vote" | "unvote" => {
            let id = words
                .next()
                .ok_or_else(|| format!("usage: /{command} <id>"))?
                .parse::<u64>()
                .map_err(|err| format!("invalid question id: {err}"))?;
            let (mut shift, mut ctrl) = (false, false);
            for word in words {
                match word {
                    "shift" => shift = true,
                    "ctrl" | "cmd" => ctrl = true,
                    other => return Err(format!("unknown vote modifier `{other}`")),
                }
            }
            let mut intent = if command == "unvote" {
                VoteIntent::down()
            } else {
                VoteIntent::up()
            };
            if shift || ctrl {
                intent = intent
                    .with_amount(VoteAmount::from_modifiers(shift, ctrl).value())
                    .overriding();
            }
            Ok(Input::Vote {
                id: ItemId(id),
                intent,
            })
        }
        "refresh" => Ok(Input::Refresh),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{other}")),
    }
}

/// Returns `false` once the user asked to leave.
async fn dispatch(handle: &SyncHandle, input: Input) -> Result<bool, SyncError> {
    match input {
        Input::Query(text) => handle.set_query(text).await?,
        Input::Submit(content) => handle.submit(content).await?,
        Input::Vote { id, intent } => handle.vote(id, intent).await?,
        Input::Refresh => handle.refresh().await?,
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

struct TerminalSurface {
    board: String,
    view: BoardView,
}

impl TerminalSurface {
    fn print(&self) {
        println!("== {} ==", self.board);
        if self.view.rows().is_empty() {
            println!("(no questions)");
        } else {
            print!("{}", self.view.render_text());
        }
    }
}

impl RenderSurface for TerminalSurface {
    fn apply(&mut self, patch: &Patch) {
        self.view.apply_patch(patch);
        self.print();
    }

    fn control_changed(&mut self, control: Control, state: ControlState) {
        self.view.control_changed(control, state);
    }

    fn input_cleared(&mut self) {
        self.view.input_cleared();
        println!("(question posted, filter cleared)");
    }

    fn notify(&mut self, notice: Notice) {
        eprintln!("{notice}");
        self.view.notify(notice);
    }
}
