//! Output module for run summaries and archive reports
//!
//! This module handles:
//! - Per-target reports collected while a run executes
//! - The end-of-run summary
//! - Archive-wide statistics read back from storage

pub mod stats;
mod summary;

pub use stats::{load_statistics, print_statistics, ArchiveStatistics};
pub use summary::{
    format_run_summary, print_run_summary, RunSummary, TargetOutcome, TargetReport, WriteCounts,
};
