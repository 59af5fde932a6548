//! Thread-Archiver: an incremental archiver for threaded social-media content
//!
//! This crate walks communities, user profiles, posts and comment trees exposed by a
//! Reddit-style JSON API and keeps them in a schema-versioned SQLite archive,
//! honouring the remote rate limit and resuming cleanly across runs.

pub mod config;
pub mod crawler;
pub mod media;
pub mod output;
pub mod state;
pub mod storage;
pub mod target;

use thiserror::Error;

pub use crawler::TransportError;
pub use media::MediaError;
pub use storage::StorageError;

/// Main error type for archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store unavailable at {path}: {reason}")]
    StoreUnavailable { path: String, reason: String },

    #[error("Migration to schema version {version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Media tool error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for ArchiveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { path, reason } => Self::StoreUnavailable { path, reason },
            StorageError::MigrationFailed { version, reason } => {
                Self::MigrationFailed { version, reason }
            }
            other => Self::Storage(other),
        }
    }
}

impl ArchiveError {
    /// Returns true if this error must stop the run before any traversal starts
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::StoreUnavailable { .. } | Self::MigrationFailed { .. }
        ) || matches!(self, Self::Transport(TransportError::AuthRequired { .. }))
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

    #[error("Invalid date '{0}': expected \"yyyy-MM-dd HH:mm\" or \"yyyy-MM-dd\"")]
    InvalidDate(String),
}

/// A raw target string that matches none of the recognized forms
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid target '{input}': {reason}")]
pub struct InvalidTarget {
    pub input: String,
    pub reason: String,
}

impl InvalidTarget {
    pub fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_archive, Coordinator};
pub use state::{decide, Decision, DedupPolicy};
pub use target::{parse_target, ParsedTarget, TargetKind, TargetSpec};
