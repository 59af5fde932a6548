//! Statistics read back from the archive
//!
//! This module provides functionality for extracting and displaying
//! archive statistics from the storage layer.

use crate::storage::{ItemKind, RunRecord, Storage, StorageResult};
use std::collections::HashMap;

/// Archive statistics summary
#[derive(Debug, Clone)]
pub struct ArchiveStatistics {
    pub schema_version: u32,

    /// Total number of archived items
    pub total_items: u64,

    /// Count of items by kind
    pub items_by_kind: HashMap<ItemKind, u64>,

    /// Items whose remote copy was deleted or removed
    pub deleted_items: u64,

    pub total_targets: u64,

    /// Targets that `previous/` aliases expand to
    pub saved_targets: u64,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(ArchiveStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<ArchiveStatistics> {
    let (total_targets, saved_targets) = storage.count_targets()?;

    Ok(ArchiveStatistics {
        schema_version: storage.schema_version()?,
        total_items: storage.count_items()?,
        items_by_kind: storage.count_items_by_kind()?,
        deleted_items: storage.count_deleted_items()?,
        total_targets,
        saved_targets,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ArchiveStatistics) {
    println!("=== Archive Statistics ===\n");

    println!("Overview:");
    println!("  Schema version: {}", stats.schema_version);
    println!(
        "  Targets: {} ({} saved)",
        stats.total_targets, stats.saved_targets
    );
    println!("  Items archived: {}", stats.total_items);
    println!();

    println!("Items by Kind:");
    for kind in [ItemKind::Post, ItemKind::Comment, ItemKind::Profile] {
        let count = stats.items_by_kind.get(&kind).copied().unwrap_or(0);
        let percentage = if stats.total_items > 0 {
            (count as f64 / stats.total_items as f64) * 100.0
        } else {
            0.0
        };
        println!("  {:?}: {} ({:.1}%)", kind, count, percentage);
    }
    println!();

    println!("Deleted upstream: {}", stats.deleted_items);

    if let Some(run) = &stats.latest_run {
        println!(
            "Last run: #{} started {} ({})",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status.to_db_string()
        );
    }
}
