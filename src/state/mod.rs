//! State module for archive bookkeeping
//!
//! This module holds the pure state machines the crawler is driven by.
//!
//! # Components
//!
//! - `Decision` / `DedupPolicy`: what to do with a fetched item given what the archive already holds
//! - `DispatchState`: request spacing and rate-limit cooldown shared by every request

mod decision;
mod dispatch;

// Re-export main types
pub use decision::{decide, Decision, DedupPolicy};
pub use dispatch::DispatchState;
