//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{Decision, DedupPolicy};
use crate::storage::{ItemKind, ItemRecord, NewItem, RunRecord, RunStatus, TargetRecord};
use crate::target::{TargetKind, TargetSpec};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Migration to schema version {version} failed: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every archive operation the engine needs. Writes take
/// `&mut self`; callers sharing a backend serialize access behind a mutex.
pub trait Storage {
    // ===== Schema =====

    /// Returns the recorded schema version (0 for a store never initialized)
    fn schema_version(&self) -> StorageResult<u32>;

    // ===== Run Management =====

    /// Creates a new archive run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Records the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Target Management =====

    /// Creates the target on first encounter
    ///
    /// An existing target keeps its `first_seen`; `saved` is only ever raised,
    /// never cleared.
    fn upsert_target(&mut self, spec: &TargetSpec, saved: bool) -> StorageResult<()>;

    /// Sets `last_fetched` to now
    ///
    /// Returns false if the target is not stored.
    fn touch_target(&mut self, spec: &TargetSpec) -> StorageResult<bool>;

    /// Gets a target by kind and identifier
    fn get_target(&self, spec: &TargetSpec) -> StorageResult<Option<TargetRecord>>;

    /// Gets every saved target of the given kinds, oldest first
    fn saved_targets(&self, kinds: &[TargetKind]) -> StorageResult<Vec<TargetRecord>>;

    // ===== Item Management =====

    /// Gets an item by its `(target_scope, remote_id)` key
    fn get_item(&self, target_scope: &str, remote_id: &str) -> StorageResult<Option<ItemRecord>>;

    /// Reconciles a fetched item with the archive in one transaction
    ///
    /// Looks up the stored record, asks the decision engine what to do under
    /// `policy`, performs the resulting write (if any) and returns the decision.
    fn apply_item(&mut self, item: &NewItem, policy: &DedupPolicy) -> StorageResult<Decision>;

    /// Counts the items stored under one target scope
    fn count_items_in_scope(&self, target_scope: &str) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Gets total item count
    fn count_items(&self) -> StorageResult<u64>;

    /// Counts items by kind
    fn count_items_by_kind(&self) -> StorageResult<HashMap<ItemKind, u64>>;

    /// Counts items marked as deleted upstream
    fn count_deleted_items(&self) -> StorageResult<u64>;

    /// Counts targets, returning `(total, saved)`
    fn count_targets(&self) -> StorageResult<(u64, u64)>;
}
