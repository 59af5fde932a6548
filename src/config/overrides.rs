use crate::config::types::{Config, DateBound};
use std::path::PathBuf;

/// Values given explicitly on the command line
///
/// `None` means "not given"; the file value (or the built-in default) is kept.
/// Flags with inverted polarity on the command line are already normalized here,
/// e.g. `--no-save-target` arrives as `save_target_to_db: Some(false)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_retries: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub min_time: Option<u64>,
    pub proxy_url: Option<String>,
    pub reject_unauthorized_tls: Option<bool>,
    pub limit: Option<u32>,
    pub after: Option<DateBound>,
    pub before: Option<DateBound>,
    pub fetch_comments: Option<bool>,
    pub fetch_post_authors: Option<bool>,
    pub overwrite: Option<bool>,
    pub overwrite_deleted: Option<bool>,
    pub continue_mode: Option<bool>,
    pub save_target_to_db: Option<bool>,
    pub auth: Option<PathBuf>,
    pub database_path: Option<String>,
}

impl ConfigOverrides {
    /// Applies every explicitly given value on top of `config`
    pub fn apply(self, mut config: Config) -> Config {
        let scheduler = &mut config.scheduler;
        set(&mut scheduler.max_retries, self.max_retries);
        set(&mut scheduler.max_concurrent, self.max_concurrent);
        set(&mut scheduler.min_time, self.min_time);

        if self.proxy_url.is_some() {
            config.proxy.url = self.proxy_url;
        }
        set(
            &mut config.proxy.reject_unauthorized_tls,
            self.reject_unauthorized_tls,
        );

        let fetch = &mut config.fetch;
        if self.limit.is_some() {
            fetch.limit = self.limit;
        }
        if self.after.is_some() {
            fetch.after = self.after;
        }
        if self.before.is_some() {
            fetch.before = self.before;
        }
        set(&mut fetch.fetch_comments, self.fetch_comments);
        set(&mut fetch.fetch_post_authors, self.fetch_post_authors);
        set(&mut fetch.overwrite, self.overwrite);
        set(&mut fetch.overwrite_deleted, self.overwrite_deleted);
        set(&mut fetch.continue_mode, self.continue_mode);
        set(&mut fetch.save_target_to_db, self.save_target_to_db);

        if self.auth.is_some() {
            config.auth = self.auth;
        }
        set(&mut config.output.database_path, self.database_path);

        config
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
