//! gleaner - incremental harvester for sequentially paginated sources
//!
//! Walks paginated sources (web comics and the like), keeps a resumable
//! cursor per source, skips items already retrieved, and groups newly
//! retrieved items into size-bounded digest messages.
//!
//! # Architecture
//!
//! One run processes its sources strictly one after the other:
//! - Each due source gets a `CrawlEngine` that walks pages through its adapter
//! - New items are saved in fetch order; the cursor only moves past saved items
//! - Saved items are packed into digest messages and dispatched
//!
//! # Modules
//!
//! - `adapters`: Source adapters (xkcd, smbc) and their registry
//! - `core`: Engine, scheduler, orchestrator and errors
//! - `domain`: Data structures (ContentItem, SourceState, ItemRecord)
//! - `store`: File and SQLite persistence behind one state store, plus the
//!   import of file records into SQLite
//! - `digest`: Digest packing, rendering and dispatch
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Harvest every due source
//! gleaner run
//!
//! # Harvest one source regardless of its schedule, without saving
//! gleaner run xkcd --force --dry-run
//!
//! # Copy file-backend metadata into the database
//! gleaner import-metadata
//!
//! # List defined sources
//! gleaner sources
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod digest;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use adapters::{AdapterRegistry, SourceAdapter};
pub use config::{Settings, SourceConfig};
pub use core::{CrawlEngine, HarvestError, HarvestOrchestrator, PollInterval, PollScheduler, RunOptions};
pub use domain::{ContentItem, ItemRecord, SourceState};
pub use store::{StateStore, UnitOfWork};
