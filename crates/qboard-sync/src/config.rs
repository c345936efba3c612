use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use qboard_storage::{BackoffPolicy, HttpClientConfig};

use crate::policy::VotePolicy;
use crate::rank::RankConfig;

/// Where query filtering happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Fetch everything and rank locally with the fuzzy ranker.
    #[default]
    Client,
    /// Send `q` to the server and keep its ordering.
    Server,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(format!("unknown search mode `{other}` (expected client or server)")),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub board: String,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub exit_delay: Duration,
    pub search_mode: SearchMode,
    pub rank_threshold: f64,
    pub receipts_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            board: "general".to_string(),
            poll_interval: Duration::from_millis(5000),
            debounce: Duration::from_millis(50),
            exit_delay: Duration::from_millis(300),
            search_mode: SearchMode::Client,
            rank_threshold: RankConfig::default().threshold,
            receipts_path: PathBuf::from("./qboard-receipts.json"),
            user_agent: "qboard/0.1".to_string(),
            http_timeout_secs: 20,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            base_url: lookup("QBOARD_BASE_URL").unwrap_or(defaults.base_url),
            board: lookup("QBOARD_BOARD")
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(defaults.board),
            poll_interval: millis("QBOARD_POLL_INTERVAL_MS", defaults.poll_interval),
            debounce: millis("QBOARD_DEBOUNCE_MS", defaults.debounce),
            exit_delay: millis("QBOARD_EXIT_DELAY_MS", defaults.exit_delay),
            search_mode: lookup("QBOARD_SEARCH_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.search_mode),
            rank_threshold: lookup("QBOARD_RANK_THRESHOLD")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.rank_threshold),
            receipts_path: lookup("QBOARD_RECEIPTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.receipts_path),
            user_agent: lookup("QBOARD_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: lookup("QBOARD_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    pub fn vote_policy(&self) -> VotePolicy {
        VotePolicy::for_board(&self.board)
    }

    pub fn rank_config(&self) -> RankConfig {
        RankConfig {
            threshold: self.rank_threshold,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = SyncConfig::from_lookup(|_| None);
        assert_eq!(config.board, "general");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.exit_delay, Duration::from_millis(300));
        assert_eq!(config.search_mode, SearchMode::Client);
        assert_eq!(config.rank_config().threshold, 0.6);
        assert!(!config.vote_policy().allow_override);
    }

    #[test]
    fn environment_overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("QBOARD_BOARD", "testing"),
            ("QBOARD_POLL_INTERVAL_MS", "1500"),
            ("QBOARD_SEARCH_MODE", "Server"),
            ("QBOARD_RANK_THRESHOLD", "0.75"),
            ("QBOARD_HTTP_TIMEOUT_SECS", "3"),
        ]));
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.search_mode, SearchMode::Server);
        assert_eq!(config.rank_threshold, 0.75);
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(3));
        assert!(config.vote_policy().allow_override);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("QBOARD_BOARD", "  "),
            ("QBOARD_DEBOUNCE_MS", "soon"),
            ("QBOARD_SEARCH_MODE", "telepathy"),
            ("QBOARD_RANK_THRESHOLD", "4.2"),
        ]));
        assert_eq!(config.board, "general");
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.search_mode, SearchMode::Client);
        assert_eq!(config.rank_threshold, 0.6);
    }
}
