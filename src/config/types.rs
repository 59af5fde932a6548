use crate::state::DedupPolicy;
use crate::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure for Thread-Archiver
///
/// Every section is optional in the TOML file; missing keys take the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub proxy: ProxyConfig,
    pub fetch: FetchConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
    pub crawler: CrawlerConfig,
    pub media: MediaConfig,

    /// Credentials file granting elevated rate limits
    pub auth: Option<PathBuf>,
}

/// Request scheduling limits shared by every job of a run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Retries after the first failed attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Maximum number of requests in flight at once
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: u32,

    /// Minimum time between two dispatch starts (milliseconds)
    #[serde(rename = "min-time")]
    pub min_time: u64,

    /// Cooldown used when a rate-limit response carries no reset hint (seconds)
    #[serde(rename = "rate-limit-cooldown")]
    pub rate_limit_cooldown: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_concurrent: 10,
            min_time: 200,
            rate_limit_cooldown: 60,
        }
    }
}

/// Outbound proxy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy URI (http, https, socks4 or socks5), credentials may be embedded
    pub url: Option<String>,

    /// Validate the proxy hop's TLS certificate
    #[serde(rename = "reject-unauthorized-tls")]
    pub reject_unauthorized_tls: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: None,
            reject_unauthorized_tls: true,
        }
    }
}

/// What to fetch and how to reconcile it with the archive
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum number of in-range items examined per listing job
    pub limit: Option<u32>,

    /// Inclusive lower bound on item creation time
    pub after: Option<DateBound>,

    /// Exclusive upper bound on item creation time
    pub before: Option<DateBound>,

    #[serde(rename = "fetch-comments")]
    pub fetch_comments: bool,

    #[serde(rename = "fetch-post-authors")]
    pub fetch_post_authors: bool,

    pub overwrite: bool,

    #[serde(rename = "overwrite-deleted")]
    pub overwrite_deleted: bool,

    /// Stop a listing walk at the first already-archived item
    #[serde(rename = "continue")]
    pub continue_mode: bool,

    #[serde(rename = "save-target-to-db")]
    pub save_target_to_db: bool,

    /// Items requested per listing page
    #[serde(rename = "page-size")]
    pub page_size: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            limit: None,
            after: None,
            before: None,
            fetch_comments: false,
            fetch_post_authors: false,
            overwrite: false,
            overwrite_deleted: false,
            continue_mode: false,
            save_target_to_db: true,
            page_size: 100,
        }
    }
}

impl FetchConfig {
    /// The dedup policy these flags describe
    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy {
            overwrite: self.overwrite,
            overwrite_deleted: self.overwrite_deleted,
            continue_mode: self.continue_mode,
        }
    }
}

/// Remote API endpoints and client identity
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API root used without credentials
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// API root used once a bearer token has been obtained
    #[serde(rename = "oauth-base-url")]
    pub oauth_base_url: String,

    /// Password-grant token endpoint
    #[serde(rename = "token-url")]
    pub token_url: String,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    pub timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            oauth_base_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            user_agent: format!("thread-archiver/{}", env!("CARGO_PKG_VERSION")),
            timeout: 30,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite archive
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "archive.db".to_string(),
        }
    }
}

/// Job pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of traversal jobs running at once
    #[serde(rename = "max-parallel-jobs")]
    pub max_parallel_jobs: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 4,
        }
    }
}

/// External media tool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub enabled: bool,

    /// Tool executable; looked up on PATH when unset
    #[serde(rename = "tool-path")]
    pub tool_path: Option<PathBuf>,

    /// Oldest tool release the media step accepts
    #[serde(rename = "min-version")]
    pub min_version: String,

    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tool_path: None,
            min_version: "4.0".to_string(),
            output_dir: PathBuf::from("media"),
        }
    }
}

/// A date or date-time bound, interpreted in UTC
///
/// Accepts the literal formats `yyyy-MM-dd HH:mm` and `yyyy-MM-dd`; a bare date
/// means midnight at the start of that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct DateBound(pub DateTime<Utc>);

impl FromStr for DateBound {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
            return Ok(Self(Utc.from_utc_datetime(&dt)));
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self(Utc.from_utc_datetime(&dt)));
            }
        }

        Err(ConfigError::InvalidDate(s.to_string()))
    }
}

impl TryFrom<String> for DateBound {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
