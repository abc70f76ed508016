//! Robots.txt handling module
//!
//! This module provides functionality for fetching, caching and matching
//! robots.txt files. Failures to fetch robots.txt never block a crawl.

mod checker;
mod parser;

pub use checker::RobotsChecker;
pub use parser::RobotsRules;
