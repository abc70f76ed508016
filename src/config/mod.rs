//! Configuration module for spiderpool
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use spiderpool::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("spider.toml")).unwrap();
//! println!("Crawling into {}", config.spider.database_file);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DomainsConfig, HttpConfig, IntervalWindow, PriorityConfig, RequestIntervalConfig,
    SpiderConfig, UrlRule, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

impl Config {
    /// Number of worker processes to run, falling back to one per CPU
    pub fn worker_count(&self) -> usize {
        self.spider.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
