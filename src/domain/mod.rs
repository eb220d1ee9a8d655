//! Domain types for gleaner.
//!
//! This module contains the core data structures:
//! - Item: pages, fetched items and their persisted records
//! - State: the per-source cursor

pub mod item;
pub mod state;

// Re-export commonly used types
pub use item::{ContentItem, ItemRecord, Media, NavLinks, PageInfo};
pub use state::SourceState;
