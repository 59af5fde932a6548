//! Expansion of raw target input into traversal jobs

use crate::storage::Storage;
use crate::target::{parse_target, ParsedTarget, TargetSpec};
use crate::{ArchiveError, InvalidTarget};
use std::collections::BTreeSet;
use std::path::Path;

/// One unit of traversal work: walk a single target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalJob {
    pub target: TargetSpec,
}

/// Outcome of resolving target input
///
/// Invalid lines do not prevent the valid ones from producing jobs.
#[derive(Debug, Default)]
pub struct Resolution {
    pub jobs: Vec<TraversalJob>,
    pub rejected: Vec<InvalidTarget>,
}

/// Returns the meaningful lines of a target file
///
/// Blank lines and lines starting with `#` are ignored.
pub fn read_target_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Resolves a raw target string, or a path to a file of them
///
/// An input naming an existing file is read line by line; anything else is
/// treated as a single raw target.
pub fn resolve_input(input: &str, storage: &dyn Storage) -> Result<Resolution, ArchiveError> {
    let path = Path::new(input);
    if path.is_file() {
        tracing::info!("Reading targets from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        return resolve_lines(&read_target_lines(&content), storage);
    }

    resolve_lines(&[input], storage)
}

/// Resolves a list of raw target strings into jobs
///
/// `previous/<letters>` entries are expanded from the saved targets in `storage`;
/// an alias with no matching saved targets contributes no jobs. Duplicate targets
/// collapse into one job, in first-seen order.
pub fn resolve_lines(lines: &[&str], storage: &dyn Storage) -> Result<Resolution, ArchiveError> {
    let mut resolution = Resolution::default();
    let mut seen = BTreeSet::new();

    for raw in lines {
        let parsed = match parse_target(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("{}", err);
                resolution.rejected.push(err);
                continue;
            }
        };

        let targets = match parsed {
            ParsedTarget::Direct(spec) => vec![spec],
            ParsedTarget::Previous(kinds) => {
                let saved = storage.saved_targets(&kinds)?;
                if saved.is_empty() {
                    tracing::info!("{} matched no saved targets", raw);
                }
                saved.into_iter().map(|record| record.spec).collect()
            }
        };

        for target in targets {
            if seen.insert(target.clone()) {
                resolution.jobs.push(TraversalJob { target });
            }
        }
    }

    Ok(resolution)
}
