//! Crawler module for archive traversal
//!
//! This module contains the core archiving logic, including:
//! - HTTP transport and decoding of the remote JSON API
//! - Request scheduling, retries and rate limiting
//! - Listing, post and comment-tree traversal
//! - Overall run coordination

mod auth;
mod context;
mod coordinator;
mod fetcher;
mod listing;
mod scheduler;
mod traversal;

pub use auth::{load_credentials, request_token, Credentials};
pub use context::RunContext;
pub use coordinator::{run_archive, Coordinator};
pub use fetcher::{
    build_http_client, ApiRequest, ApiResponse, Fetcher, RateLimitHint, TransportError,
};
pub use listing::{parse_listing, parse_more_children, parse_post_page, Thing};
pub use scheduler::{Scheduler, SchedulerStats};
pub use traversal::{run_job, DateWindow, WindowPosition};
