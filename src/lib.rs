//! Spindle: a crawl scheduler over a shared task store
//!
//! This crate coordinates concurrent crawl workers over a persistent task queue
//! that supports priority, deferred scheduling, deduplication by URL and a
//! minimum recrawl interval. The queue lives in a key/sorted-set store that can
//! be in-memory, SQLite or Redis.

pub mod config;
pub mod crawler;
pub mod queue;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Spindle operations
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Invalid task: {0}")]
    InvalidTask(#[from] queue::InvalidTaskError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] crawler::PoolError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("No handler registered for document type '{0}'")]
    NoHandler(String),

    #[error("A handler is already registered for document type '{0}'")]
    DuplicateHandler(String),

    #[error("Handler for '{document_type}' failed on {url}: {source}")]
    Handler {
        document_type: String,
        url: String,
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Spindle operations
pub type Result<T> = std::result::Result<T, SpindleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, Document, Handler, WorkerPool};
pub use queue::{Inherited, PushOutcome, Queue, Task, TaskBuilder};
pub use storage::{MemoryStore, RedisStore, SqliteStore, Store};
pub use url::{Canonicalizer, IdentityCanonicalizer, NormalizingCanonicalizer};
