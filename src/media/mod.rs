//! External media tool integration
//!
//! Hosted videos are handed to an external tool (ffmpeg by default) that
//! copies the stream into the media directory. The archiver never transcodes;
//! it only checks that a recent enough tool is installed and invokes it.

use crate::config::MediaConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::process::Command;

const DEFAULT_TOOL: &str = "ffmpeg";

/// Errors from the external media tool
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Could not read a version from '{output}'")]
    VersionUnparseable { output: String },

    #[error("Media tool version {found} is older than required {required}")]
    TooOld {
        found: ToolVersion,
        required: ToolVersion,
    },

    #[error("Media tool failed for {url}: {message}")]
    Failed { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `major.minor.patch` tool version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ToolVersion {
    type Err = MediaError;

    /// Parses `4`, `4.0` or `6.1.1`; missing parts are zero
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparseable = || MediaError::VersionUnparseable {
            output: s.to_string(),
        };

        let parts: Vec<u32> = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| unparseable()))
            .collect::<Result<_, _>>()?;

        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0, 0)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(unparseable()),
        }
    }
}

/// Extracts the version from `<tool> -version` output
///
/// Handles release builds (`ffmpeg version 4.4.2-0ubuntu0.22.04.1`) and
/// prefixed ones (`ffmpeg version n6.1.1-…`). Git snapshots (`N-109421-g…`)
/// carry no release number and are rejected.
pub fn parse_version_output(output: &str) -> Result<ToolVersion, MediaError> {
    let unparseable = || MediaError::VersionUnparseable {
        output: output.lines().next().unwrap_or_default().to_string(),
    };

    let token = output
        .split_whitespace()
        .skip_while(|word| *word != "version")
        .nth(1)
        .ok_or_else(unparseable)?;

    let numeric: String = token
        .trim_start_matches('n')
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    numeric
        .trim_end_matches('.')
        .parse()
        .map_err(|_| unparseable())
}

/// Runs `<tool> -version` and parses the result
pub async fn query_version(tool_path: Option<&Path>) -> Result<ToolVersion, MediaError> {
    let program = tool_path.unwrap_or_else(|| Path::new(DEFAULT_TOOL));

    let output = match Command::new(program).arg("-version").output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::ToolNotFound {
                tool: program.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    parse_version_output(&String::from_utf8_lossy(&output.stdout))
}

/// A detected, version-checked media tool
///
/// Created once per run and passed explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct MediaTool {
    program: PathBuf,
    version: ToolVersion,
    output_dir: PathBuf,
}

impl MediaTool {
    /// Locates the tool and checks it against `config.min_version`
    pub async fn detect(config: &MediaConfig) -> Result<Self, MediaError> {
        let required: ToolVersion = config.min_version.parse()?;
        let version = query_version(config.tool_path.as_deref()).await?;

        if version < required {
            return Err(MediaError::TooOld {
                found: version,
                required,
            });
        }

        Ok(Self {
            program: config
                .tool_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOL)),
            version,
            output_dir: config.output_dir.clone(),
        })
    }

    pub fn version(&self) -> ToolVersion {
        self.version
    }

    /// Where the stream for `stem` is written
    pub fn output_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", stem))
    }

    /// Copies the stream at `url` into the media directory
    ///
    /// # Returns
    ///
    /// * `Ok(Some(path))` - The stream was saved
    /// * `Ok(None)` - A file for `stem` already exists; nothing was done
    /// * `Err(MediaError::Failed)` - The tool exited unsuccessfully
    pub async fn archive(&self, url: &str, stem: &str) -> Result<Option<PathBuf>, MediaError> {
        let target = self.output_path(stem);
        if tokio::fs::try_exists(&target).await? {
            tracing::debug!("Media for {} already saved", stem);
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let output = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i", url, "-c", "copy"])
            .arg(&target)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::Failed {
                url: url.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!("Saved media {}", target.display());
        Ok(Some(target))
    }
}
