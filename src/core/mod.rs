//! Core harvesting logic.
//!
//! This module contains:
//! - CrawlEngine: crawl and poll walks over one source
//! - PollScheduler: whether a source is due
//! - HarvestOrchestrator: the per-run pipeline over all sources
//! - HarvestError: failure taxonomy

pub mod engine;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod schedule;

// Re-export commonly used types
pub use engine::{CrawlEngine, RunMode, StartPoint};
pub use error::HarvestError;
pub use lock::RunLock;
pub use orchestrator::{HarvestOrchestrator, HarvestReport, RunOptions, SourceReport};
pub use schedule::{PollInterval, PollScheduler, UnknownInterval};
