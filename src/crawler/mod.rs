//! Crawler module for fetching documents and running handlers
//!
//! This module contains the crawling side of the scheduler, including:
//! - HTTP fetching with a per-worker client
//! - Documents and CSS-selector link extraction
//! - Handlers keyed by document type
//! - The worker pool draining the queue
//! - The [`Crawler`] facade tying them together

mod coordinator;
mod document;
mod fetcher;
mod handler;
mod pool;

pub use coordinator::Crawler;
pub use document::{Document, DocumentError};
pub use fetcher::{ClientConfig, FetchError, Fetcher, DEFAULT_USER_AGENT};
pub use handler::{Handler, HandlerRegistry, LinkRuleHandler, TaskIter};
pub use pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
