//! Configuration module for Spindle
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use spindle::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("spindle.toml")).unwrap();
//! println!("Crawling with {} workers", config.workers.count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ClientSection, Config, DocumentTypeEntry, FollowRule, QueueConfig, SeedEntry, StoreBackend,
    WorkersConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
