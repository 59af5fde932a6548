//! Versioned schema migrations
//!
//! The store records a single schema version. At open, every registered
//! migration above that version is applied in ascending order, each inside its
//! own transaction together with the version bump, so a failure leaves the store
//! at the last migration that fully succeeded.

use crate::storage::traits::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

/// Transform applied by one migration
pub type MigrationFn = fn(&Transaction<'_>) -> StorageResult<()>;

/// One step of the schema chain
#[derive(Clone, Copy)]
pub struct Migration {
    /// Schema version the store is at after this migration
    pub version: u32,
    pub name: &'static str,
    pub apply: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// The registered chain, in application order
///
/// Released entries are never edited; schema changes append a new version.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        apply: initial,
    },
    Migration {
        version: 2,
        name: "item-created-index",
        apply: item_created_index,
    },
    Migration {
        version: 3,
        name: "runs",
        apply: runs_table,
    },
    Migration {
        version: 4,
        name: "confirm-item-key",
        apply: confirm_item_key,
    },
];

/// Summary of one migration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub applied: Vec<u32>,
}

const VERSION_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
"#;

fn initial(tx: &Transaction<'_>) -> StorageResult<()> {
    tx.execute_batch(
        r#"
-- Targets seen by the archiver
CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    identifier TEXT NOT NULL,
    saved INTEGER NOT NULL DEFAULT 1,
    first_seen TEXT NOT NULL,
    last_fetched TEXT,
    UNIQUE(kind, identifier)
);

-- Archived posts, comments and profiles
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_scope TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    parent_id TEXT,
    author TEXT,
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    content_fingerprint TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    UNIQUE(target_scope, remote_id)
);
"#,
    )?;
    Ok(())
}

fn item_created_index(tx: &Transaction<'_>) -> StorageResult<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_items_scope_created ON items(target_scope, created_at);",
    )?;
    Ok(())
}

fn runs_table(tx: &Transaction<'_>) -> StorageResult<()> {
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);
"#,
    )?;
    Ok(())
}

/// Changes nothing; fails if the item key was lost
fn confirm_item_key(tx: &Transaction<'_>) -> StorageResult<()> {
    let mut stmt = tx.prepare(
        "SELECT name FROM pragma_index_list('items') WHERE \"unique\" = 1",
    )?;
    let unique_indexes: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for index in unique_indexes {
        let columns: Vec<String> = tx
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?
            .query_map(params![index], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        if columns == ["target_scope", "remote_id"] {
            return Ok(());
        }
    }

    Err(StorageError::ConstraintViolation(
        "items is missing its (target_scope, remote_id) unique key".to_string(),
    ))
}

/// Highest version in a registry, 0 when empty
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map(|m| m.version).unwrap_or(0)
}

/// Checks that versions are positive and strictly ascending
pub fn validate_registry(migrations: &[Migration]) -> StorageResult<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version == previous {
            return Err(StorageError::MigrationFailed {
                version: migration.version,
                reason: format!("duplicate migration version ({})", migration.name),
            });
        }
        if migration.version < previous {
            return Err(StorageError::MigrationFailed {
                version: migration.version,
                reason: format!(
                    "migration '{}' registered after version {}",
                    migration.name, previous
                ),
            });
        }
        previous = migration.version;
    }
    Ok(())
}

/// Reads the recorded schema version
///
/// A store without a version table is pre-initialization and reports 0.
pub fn current_version(conn: &Connection) -> StorageResult<u32> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

/// Brings the store up to the latest version in `migrations`
///
/// # Returns
///
/// * `Ok(MigrationReport)` - Versions before and after, and which migrations ran
/// * `Err(StorageError::MigrationFailed)` - Invalid registry, a failing migration,
///   or a store written by a newer schema
pub fn run_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
) -> StorageResult<MigrationReport> {
    validate_registry(migrations)?;

    conn.execute_batch(VERSION_TABLE_SQL)?;
    let from = current_version(conn)?;
    let latest = latest_version(migrations);

    if from > latest {
        return Err(StorageError::MigrationFailed {
            version: from,
            reason: format!(
                "store is at schema version {} but this build only knows up to {}",
                from, latest
            ),
        });
    }

    let mut applied = Vec::new();
    for migration in migrations.iter().filter(|m| m.version > from) {
        if apply_one(conn, migration)? {
            tracing::info!(
                "Applied migration {} ({})",
                migration.version,
                migration.name
            );
            applied.push(migration.version);
        }
    }

    let to = current_version(conn)?;
    Ok(MigrationReport { from, to, applied })
}

/// Applies one migration, returning false if another writer already did
fn apply_one(conn: &mut Connection, migration: &Migration) -> StorageResult<bool> {
    let failed = |e: StorageError| StorageError::MigrationFailed {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| failed(e.into()))?;

    let recorded: u32 = tx
        .query_row(
            "SELECT COALESCE((SELECT version FROM schema_version WHERE id = 1), 0)",
            [],
            |row| row.get(0),
        )
        .map_err(|e| failed(e.into()))?;
    if recorded >= migration.version {
        return Ok(false);
    }

    (migration.apply)(&tx).map_err(failed)?;

    tx.execute(
        "INSERT INTO schema_version (id, version) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        params![migration.version],
    )
    .map_err(|e| failed(e.into()))?;

    tx.commit().map_err(|e| failed(e.into()))?;
    Ok(true)
}
