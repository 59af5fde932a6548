//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{decide, Decision, DedupPolicy};
use crate::storage::migrations::{current_version, run_migrations, Migration, MIGRATIONS};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ItemKind, ItemRecord, NewItem, RunRecord, RunStatus, TargetRecord};
use crate::target::{TargetKind, TargetSpec};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on another process's lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const ITEM_COLUMNS: &str = "id, target_scope, remote_id, kind, parent_id, author, created_at, \
     deleted_at, content_fingerprint, fetched_at, payload";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the archive at `path` and migrates it
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Store ready at the latest schema version
    /// * `Err(StorageError)` - `Unavailable` if the file cannot be opened as a
    ///   database, `MigrationFailed` if the schema cannot be brought up to date
    pub fn new(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, MIGRATIONS)
    }

    /// Opens the archive at `path` using an explicit migration chain
    pub fn open_with(path: &Path, migrations: &[Migration]) -> StorageResult<Self> {
        let unavailable = |e: rusqlite::Error| StorageError::Unavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let conn = Connection::open(path).map_err(unavailable)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;

        // WAL lets readers proceed while another process writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )
        .map_err(unavailable)?;

        Self::migrated(conn, migrations)
    }

    /// Creates an in-memory store at the latest schema version
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrated(conn, MIGRATIONS)
    }

    fn migrated(mut conn: Connection, migrations: &[Migration]) -> StorageResult<Self> {
        let report = run_migrations(&mut conn, migrations)?;
        if !report.applied.is_empty() {
            tracing::debug!(
                "Schema migrated from version {} to {}",
                report.from,
                report.to
            );
        }
        Ok(Self { conn })
    }
}

fn bad_column(idx: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unrecognized value '{}'", value).into(),
    )
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<TargetRecord> {
    let kind_str: String = row.get(1)?;
    let kind = TargetKind::from_db_string(&kind_str).ok_or_else(|| bad_column(1, kind_str))?;

    let identifier: String = row.get(2)?;
    let name = identifier
        .split_once('/')
        .map(|(_, name)| name)
        .unwrap_or(&identifier);

    Ok(TargetRecord {
        id: row.get(0)?,
        spec: TargetSpec::new(kind, name),
        saved: row.get(3)?,
        first_seen: row.get(4)?,
        last_fetched: row.get(5)?,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    let kind_str: String = row.get(3)?;
    let kind = ItemKind::from_db_string(&kind_str).ok_or_else(|| bad_column(3, kind_str))?;

    Ok(ItemRecord {
        id: row.get(0)?,
        target_scope: row.get(1)?,
        remote_id: row.get(2)?,
        kind,
        parent_id: row.get(4)?,
        author: row.get(5)?,
        created_at: row.get(6)?,
        deleted_at: row.get(7)?,
        fingerprint: row.get(8)?,
        fetched_at: row.get(9)?,
        payload: row.get(10)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Schema =====

    fn schema_version(&self) -> StorageResult<u32> {
        current_version(&self.conn)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        Ok(())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    // ===== Target Management =====

    fn upsert_target(&mut self, spec: &TargetSpec, saved: bool) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO targets (kind, identifier, saved, first_seen) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, identifier) DO UPDATE SET saved = MAX(saved, excluded.saved)",
            params![spec.kind.to_db_string(), spec.identifier(), saved, now],
        )?;
        Ok(())
    }

    fn touch_target(&mut self, spec: &TargetSpec) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE targets SET last_fetched = ?1 WHERE kind = ?2 AND identifier = ?3",
            params![now, spec.kind.to_db_string(), spec.identifier()],
        )?;
        Ok(updated > 0)
    }

    fn get_target(&self, spec: &TargetSpec) -> StorageResult<Option<TargetRecord>> {
        let target = self
            .conn
            .query_row(
                "SELECT id, kind, identifier, saved, first_seen, last_fetched
                 FROM targets WHERE kind = ?1 AND identifier = ?2",
                params![spec.kind.to_db_string(), spec.identifier()],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn saved_targets(&self, kinds: &[TargetKind]) -> StorageResult<Vec<TargetRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, identifier, saved, first_seen, last_fetched
             FROM targets WHERE saved = 1 ORDER BY id",
        )?;

        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|t| kinds.contains(&t.spec.kind))
            .collect();

        Ok(targets)
    }

    // ===== Item Management =====

    fn get_item(&self, target_scope: &str, remote_id: &str) -> StorageResult<Option<ItemRecord>> {
        let item = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM items WHERE target_scope = ?1 AND remote_id = ?2",
                    ITEM_COLUMNS
                ),
                params![target_scope, remote_id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn apply_item(&mut self, item: &NewItem, policy: &DedupPolicy) -> StorageResult<Decision> {
        let payload = serde_json::to_string(&item.payload)?;
        let now = Utc::now().to_rfc3339();
        let deleted_at = item.deleted_upstream.then(|| now.clone());

        // Take the write lock before reading so the lookup and the write are atomic
        // across processes sharing the file
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM items WHERE target_scope = ?1 AND remote_id = ?2",
                    ITEM_COLUMNS
                ),
                params![item.target_scope, item.remote_id],
                row_to_item,
            )
            .optional()?;

        let decision = decide(existing.as_ref(), item.deleted_upstream, policy);

        match decision {
            Decision::Insert => {
                tx.execute(
                    "INSERT INTO items (target_scope, remote_id, kind, parent_id, author, created_at,
                     deleted_at, content_fingerprint, fetched_at, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        item.target_scope,
                        item.remote_id,
                        item.kind.to_db_string(),
                        item.parent_id,
                        item.author,
                        item.created_at.to_rfc3339(),
                        deleted_at,
                        item.fingerprint,
                        now,
                        payload,
                    ],
                )?;
            }
            Decision::Replace => {
                tx.execute(
                    "UPDATE items SET kind = ?3, parent_id = ?4, author = ?5, created_at = ?6,
                     deleted_at = ?7, content_fingerprint = ?8, fetched_at = ?9, payload = ?10
                     WHERE target_scope = ?1 AND remote_id = ?2",
                    params![
                        item.target_scope,
                        item.remote_id,
                        item.kind.to_db_string(),
                        item.parent_id,
                        item.author,
                        item.created_at.to_rfc3339(),
                        deleted_at,
                        item.fingerprint,
                        now,
                        payload,
                    ],
                )?;
            }
            Decision::MarkDeleted => {
                tx.execute(
                    "UPDATE items SET deleted_at = ?3 WHERE target_scope = ?1 AND remote_id = ?2",
                    params![item.target_scope, item.remote_id, now],
                )?;
            }
            Decision::Skip | Decision::Halt => {}
        }

        tx.commit()?;
        Ok(decision)
    }

    fn count_items_in_scope(&self, target_scope: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE target_scope = ?1",
            params![target_scope],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn count_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_items_by_kind(&self) -> StorageResult<HashMap<ItemKind, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM items GROUP BY kind")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (kind, count) = row?;
            if let Some(kind) = ItemKind::from_db_string(&kind) {
                counts.insert(kind, count as u64);
            }
        }

        Ok(counts)
    }

    fn count_deleted_items(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE deleted_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_targets(&self) -> StorageResult<(u64, u64)> {
        let (total, saved): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(saved), 0) FROM targets",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, saved as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn policy(overwrite: bool, overwrite_deleted: bool, continue_mode: bool) -> DedupPolicy {
        DedupPolicy {
            overwrite,
            overwrite_deleted,
            continue_mode,
        }
    }

    fn post(remote_id: &str, body: &str, deleted: bool) -> NewItem {
        NewItem {
            target_scope: "r/test".to_string(),
            remote_id: remote_id.to_string(),
            kind: ItemKind::Post,
            parent_id: None,
            author: Some("someone".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            deleted_upstream: deleted,
            fingerprint: format!("fp-{}", body),
            payload: json!({ "name": remote_id, "selftext": body }),
        }
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.schema_version().unwrap(), 4);
    }

    #[test]
    fn test_run_lifecycle() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("test_hash").unwrap();
        assert!(run_id > 0);

        storage.finish_run(run_id, RunStatus::Interrupted).unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Interrupted);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_upsert_target_never_clears_saved() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let spec = TargetSpec::new(TargetKind::Community, "rust");

        storage.upsert_target(&spec, true).unwrap();
        let first = storage.get_target(&spec).unwrap().unwrap();
        storage.upsert_target(&spec, false).unwrap();
        let second = storage.get_target(&spec).unwrap().unwrap();

        assert!(second.saved);
        assert_eq!(first.first_seen, second.first_seen);
        assert_eq!(storage.count_targets().unwrap(), (1, 1));
    }

    #[test]
    fn test_upsert_target_promotes_to_saved() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let spec = TargetSpec::new(TargetKind::User, "author");

        storage.upsert_target(&spec, false).unwrap();
        assert!(storage.saved_targets(&[TargetKind::User]).unwrap().is_empty());

        storage.upsert_target(&spec, true).unwrap();
        let saved = storage.saved_targets(&[TargetKind::User]).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].spec, spec);
    }

    #[test]
    fn test_touch_target() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let spec = TargetSpec::new(TargetKind::Post, "abc123");

        assert!(!storage.touch_target(&spec).unwrap());
        assert!(storage.get_target(&spec).unwrap().is_none());

        storage.upsert_target(&spec, true).unwrap();
        assert!(storage.get_target(&spec).unwrap().unwrap().last_fetched.is_none());
        assert!(storage.touch_target(&spec).unwrap());
        assert!(storage.get_target(&spec).unwrap().unwrap().last_fetched.is_some());
    }

    #[test]
    fn test_apply_item_insert_then_skip() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let item = post("t3_a", "hello", false);

        let first = storage.apply_item(&item, &DedupPolicy::default()).unwrap();
        let second = storage.apply_item(&item, &DedupPolicy::default()).unwrap();

        assert_eq!(first, Decision::Insert);
        assert_eq!(second, Decision::Skip);
        assert_eq!(storage.count_items().unwrap(), 1);

        let stored = storage.get_item("r/test", "t3_a").unwrap().unwrap();
        assert_eq!(stored.kind, ItemKind::Post);
        assert!(stored.deleted_at.is_none());
        assert!(stored.payload.contains("hello"));
    }

    #[test]
    fn test_same_remote_id_in_two_scopes() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let item = post("t3_a", "hello", false);
        let mut other = item.clone();
        other.target_scope = "u/someone".to_string();

        storage.apply_item(&item, &DedupPolicy::default()).unwrap();
        let decision = storage.apply_item(&other, &DedupPolicy::default()).unwrap();

        assert_eq!(decision, Decision::Insert);
        assert_eq!(storage.count_items_in_scope("r/test").unwrap(), 1);
        assert_eq!(storage.count_items_in_scope("u/someone").unwrap(), 1);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .apply_item(&post("t3_a", "before", false), &DedupPolicy::default())
            .unwrap();

        let decision = storage
            .apply_item(&post("t3_a", "after", false), &policy(true, false, false))
            .unwrap();

        assert_eq!(decision, Decision::Replace);
        let stored = storage.get_item("r/test", "t3_a").unwrap().unwrap();
        assert_eq!(stored.fingerprint, "fp-after");
        assert!(stored.payload.contains("after"));
    }

    #[test]
    fn test_deleted_upstream_is_marked_and_kept() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .apply_item(&post("t3_a", "original", false), &DedupPolicy::default())
            .unwrap();

        let decision = storage
            .apply_item(&post("t3_a", "[deleted]", true), &DedupPolicy::default())
            .unwrap();
        assert_eq!(decision, Decision::MarkDeleted);

        let stored = storage.get_item("r/test", "t3_a").unwrap().unwrap();
        assert!(stored.deleted_at.is_some());
        assert!(stored.payload.contains("original"));
        assert_eq!(storage.count_deleted_items().unwrap(), 1);

        // A later live copy does not resurrect it without overwrite_deleted
        let decision = storage
            .apply_item(&post("t3_a", "original", false), &policy(true, false, false))
            .unwrap();
        assert_eq!(decision, Decision::Skip);
        assert!(storage
            .get_item("r/test", "t3_a")
            .unwrap()
            .unwrap()
            .deleted_at
            .is_some());

        let decision = storage
            .apply_item(&post("t3_a", "restored", false), &policy(false, true, false))
            .unwrap();
        assert_eq!(decision, Decision::Replace);
        let stored = storage.get_item("r/test", "t3_a").unwrap().unwrap();
        assert!(stored.deleted_at.is_none());
        assert!(stored.payload.contains("restored"));
    }

    #[test]
    fn test_continue_mode_halts_without_writing() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .apply_item(&post("t3_a", "before", false), &DedupPolicy::default())
            .unwrap();

        let decision = storage
            .apply_item(&post("t3_a", "after", false), &policy(false, false, true))
            .unwrap();

        assert_eq!(decision, Decision::Halt);
        let stored = storage.get_item("r/test", "t3_a").unwrap().unwrap();
        assert_eq!(stored.fingerprint, "fp-before");
    }

    #[test]
    fn test_count_items_by_kind() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .apply_item(&post("t3_a", "a", false), &DedupPolicy::default())
            .unwrap();
        let mut comment = post("t1_b", "b", false);
        comment.kind = ItemKind::Comment;
        comment.parent_id = Some("t3_a".to_string());
        storage.apply_item(&comment, &DedupPolicy::default()).unwrap();

        let counts = storage.count_items_by_kind().unwrap();
        assert_eq!(counts.get(&ItemKind::Post), Some(&1));
        assert_eq!(counts.get(&ItemKind::Comment), Some(&1));
        assert_eq!(counts.get(&ItemKind::Profile), None);
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.db");

        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            storage
                .apply_item(&post("t3_a", "a", false), &DedupPolicy::default())
                .unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.schema_version().unwrap(), 4);
        assert_eq!(storage.count_items().unwrap(), 1);
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.db");

        let mut first = SqliteStorage::new(&path).unwrap();
        let mut second = SqliteStorage::new(&path).unwrap();

        let item = post("t3_a", "a", false);
        assert_eq!(
            first.apply_item(&item, &DedupPolicy::default()).unwrap(),
            Decision::Insert
        );
        assert_eq!(
            second.apply_item(&item, &DedupPolicy::default()).unwrap(),
            Decision::Skip
        );
        assert_eq!(second.count_items().unwrap(), 1);
    }

    #[test]
    fn test_unopenable_path_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("archive.db");

        let result = SqliteStorage::new(&path);
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }

    #[test]
    fn test_not_a_database_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let result = SqliteStorage::new(&path);
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }
}
