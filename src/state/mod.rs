//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlItemState`: Where a queue item is in its crawl lifecycle, with the
//!   table of legal transitions

mod item_state;

// Re-export main types
pub use item_state::CrawlItemState;
