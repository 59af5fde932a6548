//! Target handling module
//!
//! This module classifies raw target strings (`r/<name>`, `u/<name>`, `p/<id>`,
//! post permalinks and `previous/<letters>` aliases) and expands them into
//! traversal jobs.

mod parse;
mod resolve;

pub use parse::parse_target;
pub use resolve::{read_target_lines, resolve_input, resolve_lines, Resolution, TraversalJob};

use std::fmt;

/// The kind of crawlable unit a target names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    /// A community listing (`r/<name>`)
    Community,
    /// A user's submissions (`u/<name>`)
    User,
    /// A single post and, optionally, its comment tree (`p/<id>`)
    Post,
}

impl TargetKind {
    /// Short prefix used in identifiers and `previous/` aliases
    pub fn prefix(&self) -> char {
        match self {
            Self::Community => 'r',
            Self::User => 'u',
            Self::Post => 'p',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            'r' => Some(Self::Community),
            'u' => Some(Self::User),
            'p' => Some(Self::Post),
            _ => None,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::User => "user",
            Self::Post => "post",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "community" => Some(Self::Community),
            "user" => Some(Self::User),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

/// A resolved, canonical target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetSpec {
    pub kind: TargetKind,
    /// Community name, user name or post id, lower-cased
    pub name: String,
}

impl TargetSpec {
    pub fn new(kind: TargetKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_ascii_lowercase(),
        }
    }

    /// Canonical identifier, unique per kind (`r/rust`, `u/someone`, `p/1abcd`)
    ///
    /// Items collected by this target's job are stored under this scope.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.kind.prefix(), self.name)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.prefix(), self.name)
    }
}

/// Result of classifying one raw target string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTarget {
    /// A single community, user or post
    Direct(TargetSpec),
    /// `previous/<letters>`: every saved target of the listed kinds
    Previous(Vec<TargetKind>),
}
