//! Run summary types and formatting

use crate::crawler::SchedulerStats;
use crate::state::Decision;
use crate::storage::RunStatus;
use std::fmt::Write as _;
use std::time::Duration;

/// How completely one target was archived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    /// Every request of the job succeeded
    FullyDownloaded,
    /// Some items or pages failed; what succeeded is stored
    PartiallyDownloaded,
    /// The job could not start, or was cancelled before doing any work
    Skipped,
}

impl TargetOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FullyDownloaded => "fully downloaded",
            Self::PartiallyDownloaded => "partially downloaded",
            Self::Skipped => "skipped",
        }
    }
}

/// Item writes performed by a job, by decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub inserted: u64,
    pub replaced: u64,
    pub marked_deleted: u64,
    pub skipped: u64,
}

impl WriteCounts {
    /// Counts one decision; `Halt` writes nothing and is counted as skipped
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Insert => self.inserted += 1,
            Decision::Replace => self.replaced += 1,
            Decision::MarkDeleted => self.marked_deleted += 1,
            Decision::Skip | Decision::Halt => self.skipped += 1,
        }
    }

    /// Number of rows written
    pub fn writes(&self) -> u64 {
        self.inserted + self.replaced + self.marked_deleted
    }

    pub fn merge(&mut self, other: &WriteCounts) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.marked_deleted += other.marked_deleted;
        self.skipped += other.skipped;
    }
}

/// What happened to one target during a run
#[derive(Debug, Clone)]
pub struct TargetReport {
    /// Canonical identifier (`r/rust`), or the raw input for rejected lines
    pub target: String,
    pub outcome: TargetOutcome,
    pub counts: WriteCounts,
    /// Requests or writes that failed after retries; make the target partial
    pub failures: Vec<String>,
    /// Problems that do not affect completeness (e.g. media, author profiles)
    pub warnings: Vec<String>,
    /// API requests that succeeded
    pub requests: u64,
}

impl TargetReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            outcome: TargetOutcome::FullyDownloaded,
            counts: WriteCounts::default(),
            failures: Vec::new(),
            warnings: Vec::new(),
            requests: 0,
        }
    }

    /// A target that never started
    pub fn skipped(target: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut report = Self::new(target);
        report.outcome = TargetOutcome::Skipped;
        report.failures.push(reason.into());
        report
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: {}", self.target, message);
        self.failures.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: {}", self.target, message);
        self.warnings.push(message);
    }

    /// Sets the outcome from what was recorded
    ///
    /// A cancelled job that got no response at all counts as skipped.
    pub fn finish(&mut self, cancelled: bool) {
        self.outcome = if cancelled && self.requests == 0 {
            TargetOutcome::Skipped
        } else if cancelled || !self.failures.is_empty() {
            TargetOutcome::PartiallyDownloaded
        } else {
            TargetOutcome::FullyDownloaded
        };
    }
}

/// Summary of a complete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub targets: Vec<TargetReport>,
    pub scheduler: SchedulerStats,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn totals(&self) -> WriteCounts {
        let mut totals = WriteCounts::default();
        for report in &self.targets {
            totals.merge(&report.counts);
        }
        totals
    }

    pub fn count_outcome(&self, outcome: TargetOutcome) -> usize {
        self.targets.iter().filter(|t| t.outcome == outcome).count()
    }

    pub fn report_for(&self, target: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target == target)
    }

    /// Every failure and warning, prefixed with its target
    pub fn warnings(&self) -> Vec<String> {
        self.targets
            .iter()
            .flat_map(|t| {
                t.failures
                    .iter()
                    .chain(t.warnings.iter())
                    .map(move |w| format!("{}: {}", t.target, w))
            })
            .collect()
    }
}

/// Formats a run summary for the terminal
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let totals = summary.totals();

    let _ = writeln!(out, "=== Run {} ({}) ===\n", summary.run_id, summary.status.to_db_string());
    let _ = writeln!(out, "Targets:");
    for report in &summary.targets {
        let _ = writeln!(
            out,
            "  {:<30} {:<22} +{} ~{} x{} ={}",
            report.target,
            report.outcome.label(),
            report.counts.inserted,
            report.counts.replaced,
            report.counts.marked_deleted,
            report.counts.skipped
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Items:");
    let _ = writeln!(out, "  Inserted: {}", totals.inserted);
    let _ = writeln!(out, "  Replaced: {}", totals.replaced);
    let _ = writeln!(out, "  Marked deleted: {}", totals.marked_deleted);
    let _ = writeln!(out, "  Unchanged: {}", totals.skipped);
    let _ = writeln!(out);

    let _ = writeln!(out, "Requests:");
    let _ = writeln!(out, "  Dispatched: {}", summary.scheduler.dispatched);
    let _ = writeln!(out, "  Retried: {}", summary.scheduler.retried);
    let _ = writeln!(out, "  Rate limited: {}", summary.scheduler.rate_limited);
    let _ = writeln!(out, "  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());

    let warnings = summary.warnings();
    if !warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings ({}):", warnings.len());
        for warning in warnings {
            let _ = writeln!(out, "  - {}", warning);
        }
    }

    out
}

/// Prints a run summary to stdout
pub fn print_run_summary(summary: &RunSummary) {
    print!("{}", format_run_summary(summary));
}
