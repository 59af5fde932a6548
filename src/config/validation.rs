use crate::config::types::{
    ApiConfig, Config, CrawlerConfig, FetchConfig, MediaConfig, OutputConfig, ProxyConfig,
    SchedulerConfig,
};
use crate::media::ToolVersion;
use crate::ConfigError;
use url::Url;

/// Proxy schemes the transport accepts
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks4", "socks5"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_proxy_config(&config.proxy)?;
    validate_fetch_config(&config.fetch)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    validate_crawler_config(&config.crawler)?;
    validate_media_config(&config.media)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be >= 1, got {}",
            config.max_concurrent
        )));
    }

    if config.rate_limit_cooldown < 1 {
        return Err(ConfigError::Validation(
            "rate-limit-cooldown must be at least 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates the proxy URI: supported scheme and a host to connect to
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    let Some(raw) = &config.url else {
        return Ok(());
    };

    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy url '{}': {}", raw, e)))?;

    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::Validation(format!(
            "Proxy scheme '{}' is not supported (expected one of {})",
            url.scheme(),
            PROXY_SCHEMES.join(", ")
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!(
            "Proxy url '{}' has no host",
            raw
        )));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.limit == Some(0) {
        return Err(ConfigError::Validation(
            "limit must be >= 1 when set".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if let (Some(after), Some(before)) = (config.after, config.before) {
        if after >= before {
            return Err(ConfigError::Validation(format!(
                "after ({}) must be earlier than before ({})",
                after.0, before.0
            )));
        }
    }

    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("base-url", &config.base_url),
        ("oauth-base-url", &config.oauth_base_url),
        ("token-url", &config.token_url),
    ] {
        Url::parse(value)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout < 1 {
        return Err(ConfigError::Validation(
            "timeout must be at least 1 second".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_parallel_jobs < 1 {
        return Err(ConfigError::Validation(format!(
            "max-parallel-jobs must be >= 1, got {}",
            config.max_parallel_jobs
        )));
    }

    Ok(())
}

fn validate_media_config(config: &MediaConfig) -> Result<(), ConfigError> {
    config.min_version.parse::<ToolVersion>().map_err(|_| {
        ConfigError::Validation(format!(
            "media min-version '{}' is not a version number",
            config.min_version
        ))
    })?;

    Ok(())
}
