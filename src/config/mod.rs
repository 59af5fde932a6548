//! Configuration module for Thread-Archiver
//!
//! This module loads the optional TOML configuration file, layers command-line
//! overrides on top of it and validates the merged result once, before the engine
//! starts.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use thread_archiver::config::{assemble_config, ConfigOverrides};
//!
//! let config = assemble_config(Some(Path::new("archiver.toml")), ConfigOverrides::default()).unwrap();
//! println!("Up to {} requests in flight", config.scheduler.max_concurrent);
//! ```

mod overrides;
mod parser;
mod types;
mod validation;

pub use overrides::ConfigOverrides;
pub use types::{
    ApiConfig, Config, CrawlerConfig, DateBound, FetchConfig, MediaConfig, OutputConfig,
    ProxyConfig, SchedulerConfig,
};

pub use parser::{assemble_config, config_hash, load_config, read_config};
pub use validation::validate;
