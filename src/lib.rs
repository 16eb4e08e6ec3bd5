//! Feed-Harvest: incremental feed synchronization and classification engine
//!
//! This crate periodically pulls new posts from remote accounts, persists them,
//! and feeds unclassified posts through an external classifier. The core is the
//! engine that tracks per-account watermarks, fans work out over a bounded
//! worker pool, bounds retries with a durable ledger, and honors a durable
//! rate-limit reset across restarts.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod feed;
pub mod model;
pub mod output;
pub mod state;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Feed-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Transport error for {target}: {message}")]
    Transport { target: String, message: String },

    #[error("Parse error for {target}: {message}")]
    Parse { target: String, message: String },

    #[error("Rate limited on credential {credential}")]
    RateLimited {
        credential: String,
        retry_after: Option<Duration>,
    },

    #[error("Fatal setup error: {0}")]
    FatalSetup(String),

    #[error("No feed source handles account {0}")]
    UnsupportedAccount(String),

    #[error("Worker for {key} panicked: {message}")]
    WorkerPanic { key: String, message: String },

    #[error("Cycle cancelled")]
    Cancelled,

    #[error("Invalid cycle transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CycleState,
        to: state::CycleState,
    },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loggable classification of a [`HarvestError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Parse,
    RateLimit,
    Storage,
    FatalSetup,
    Unsupported,
    WorkerPanic,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Parse => "parse",
            Self::RateLimit => "rate_limit",
            Self::Storage => "storage",
            Self::FatalSetup => "fatal_setup",
            Self::Unsupported => "unsupported",
            Self::WorkerPanic => "worker_panic",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HarvestError {
    /// Builds a transport error for the given target (account URL, post id, endpoint)
    pub fn transport(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Builds a parse error for the given target
    pub fn parse(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Http(_) => ErrorKind::Transport,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Storage(_) => ErrorKind::Storage,
            Self::FatalSetup(_) => ErrorKind::FatalSetup,
            Self::UnsupportedAccount(_) => ErrorKind::Unsupported,
            Self::WorkerPanic { .. } => ErrorKind::WorkerPanic,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::Scheduler(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if a failed work item may be requeued within the same cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport
                | ErrorKind::Parse
                | ErrorKind::RateLimit
                | ErrorKind::Storage
                | ErrorKind::WorkerPanic
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Result type alias for Feed-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{ClassificationOutcome, EventRecord, MediaItem, Post};
pub use state::{CycleState, Watermark};
