//! Storage module for the local archive
//!
//! This module handles all database operations, including:
//! - Opening the SQLite archive and bringing its schema up to date
//! - Target bookkeeping (first seen, last fetched, saved flag)
//! - Item persistence keyed by `(target_scope, remote_id)`
//! - Run tracking

mod migrations;
mod sqlite;
mod traits;

pub use migrations::{
    current_version, latest_version, run_migrations, validate_registry, Migration,
    MigrationReport, MIGRATIONS,
};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::target::TargetSpec;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens the archive at `path`, applying any pending migrations
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - The store at the latest schema version
/// * `Err(StorageError::Unavailable)` - The database could not be opened
/// * `Err(StorageError::MigrationFailed)` - A migration failed; the store keeps its last good version
pub fn open_store(path: &Path) -> Result<SqliteStorage, StorageError> {
    SqliteStorage::new(path)
}

/// Represents a target in the database
#[derive(Debug, Clone)]
pub struct TargetRecord {
    pub id: i64,
    pub spec: TargetSpec,
    pub saved: bool,
    pub first_seen: DateTime<Utc>,
    pub last_fetched: Option<DateTime<Utc>>,
}

/// The kind of content an item holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Post,
    Comment,
    Profile,
}

impl ItemKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Profile => "profile",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "post" => Some(Self::Post),
            "comment" => Some(Self::Comment),
            "profile" => Some(Self::Profile),
            _ => None,
        }
    }
}

/// An item as fetched from the remote API, ready to be reconciled
#[derive(Debug, Clone)]
pub struct NewItem {
    pub target_scope: String,
    pub remote_id: String,
    pub kind: ItemKind,
    pub parent_id: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    /// The remote copy is a deleted/removed tombstone
    pub deleted_upstream: bool,
    pub fingerprint: String,
    pub payload: serde_json::Value,
}

/// Represents an archived item
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub id: i64,
    pub target_scope: String,
    pub remote_id: String,
    pub kind: ItemKind,
    pub parent_id: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
    pub fetched_at: DateTime<Utc>,
    /// Raw JSON object as returned by the API
    pub payload: String,
}

/// Represents an archive run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of an archive run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
        assert_eq!(RunStatus::from_db_string("interrupted"), Some(RunStatus::Interrupted));
    }

    #[test]
    fn test_item_kind_strings() {
        assert_eq!(ItemKind::from_db_string("comment"), Some(ItemKind::Comment));
        assert_eq!(ItemKind::Profile.to_db_string(), "profile");
        assert_eq!(ItemKind::from_db_string("t3"), None);
    }
}
