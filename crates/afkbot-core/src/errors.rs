use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Core error type for the AFK bot.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can tell user-facing rejections apart from system faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("rank config not found: {0}")]
    ConfigMissing(PathBuf),

    #[error("rank config unreadable: {path}: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("store unreadable: {path}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("failed to write store {path}: {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("user is already AFK since {since}")]
    AlreadyAfk { since: DateTime<Utc> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Rejections that should be shown to the user rather than logged as faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::AlreadyAfk { .. } | Error::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
