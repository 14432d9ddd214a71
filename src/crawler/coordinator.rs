//! Crawler facade
//!
//! [`Crawler`] ties a [`Queue`], a [`HandlerRegistry`] and a [`WorkerPool`]
//! together:
//! - Building all three from a loaded [`Config`]
//! - Registering handlers and pushing seed tasks
//! - Starting and gracefully stopping the workers
//! - Probing a single URL without touching the queue

use crate::config::{Config, SeedEntry};
use crate::crawler::document::Document;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::handler::{Handler, HandlerRegistry};
use crate::crawler::pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
use crate::queue::{PushOutcome, Queue, Task};
use crate::storage::open_store;
use crate::url::NormalizingCanonicalizer;
use crate::SpindleError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A crawl: one queue, its handlers and the workers draining it
pub struct Crawler {
    queue: Arc<Queue>,
    handlers: HandlerRegistry,
    pool_config: WorkerPoolConfig,
    pool: Option<WorkerPool>,
}

impl Crawler {
    /// Creates a crawler over an existing queue with no handlers registered
    pub fn new(queue: Queue, pool_config: WorkerPoolConfig) -> Self {
        Self {
            queue: Arc::new(queue),
            handlers: HandlerRegistry::new(),
            pool_config,
            pool: None,
        }
    }

    /// Builds a crawler from configuration
    ///
    /// Opens the configured store backend, enables URL normalization when
    /// `canonicalize` is set, and registers one link-following handler per
    /// `[[document-type]]`. Seeds are not pushed; see [`seed_from_config`].
    ///
    /// # Arguments
    ///
    /// * `config` - A validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to seed and start
    /// * `Err(SpindleError)` - The store could not be opened or a follow rule is invalid
    ///
    /// [`seed_from_config`]: Self::seed_from_config
    pub fn from_config(config: &Config) -> Result<Self, SpindleError> {
        let store = open_store(&config.queue)?;

        let mut queue = Queue::new(config.queue.name.as_str(), store);
        if config.queue.canonicalize {
            queue = queue.with_canonicalizer(Arc::new(NormalizingCanonicalizer));
        }

        let mut crawler = Self::new(queue, WorkerPoolConfig::from_config(config));
        crawler.handlers = HandlerRegistry::from_config(&config.document_types)?;

        tracing::info!(
            queue = %config.queue.name,
            backend = ?config.queue.backend,
            document_types = crawler.handlers.len(),
            "Crawler initialized"
        );

        Ok(crawler)
    }

    /// Runs [`from_config`] on the blocking thread pool
    ///
    /// For async callers; opening SQLite or Redis blocks.
    ///
    /// [`from_config`]: Self::from_config
    pub async fn open(config: &Config) -> Result<Self, SpindleError> {
        let config = config.clone();
        run_blocking(move || Self::from_config(&config)).await
    }

    /// Runs [`from_config`] and then [`seed_from_config`] on the blocking thread pool
    ///
    /// Returns the crawler with how many seeds were enqueued.
    ///
    /// [`from_config`]: Self::from_config
    /// [`seed_from_config`]: Self::seed_from_config
    pub async fn open_seeded(config: &Config) -> Result<(Self, usize), SpindleError> {
        let config = config.clone();
        run_blocking(move || {
            let crawler = Self::from_config(&config)?;
            let enqueued = crawler.seed_from_config(&config.seeds)?;
            Ok((crawler, enqueued))
        })
        .await
    }

    /// Registers the handler for a document type
    ///
    /// Handlers must be registered before [`start`](Self::start).
    pub fn add_handler<H>(&mut self, document_type: &str, handler: H) -> Result<(), SpindleError>
    where
        H: Handler + 'static,
    {
        if self.is_running() {
            return Err(PoolError::AlreadyRunning.into());
        }
        self.handlers.add(document_type, Arc::new(handler))
    }

    /// Pushes a seed task
    ///
    /// A seed without a referer is fetched without one. With `interval` set,
    /// the seed is re-queued that long after every pop. Blocks on the store.
    pub fn add_seed(
        &self,
        url: &str,
        document_type: &str,
        referer: Option<&str>,
        interval: Option<Duration>,
    ) -> Result<PushOutcome, SpindleError> {
        let mut builder = Task::builder(url).document_type(document_type);
        builder = match referer {
            Some(referer) => builder.referer(referer),
            None => builder.no_referer(),
        };
        if let Some(interval) = interval {
            builder = builder.repeat_after(interval);
        }

        self.push_seed(builder.build()?)
    }

    /// Pushes every `[[seed]]` entry and returns how many were enqueued
    pub fn seed_from_config(&self, seeds: &[SeedEntry]) -> Result<usize, SpindleError> {
        let mut enqueued = 0;
        for seed in seeds {
            if self.push_seed(seed_task(seed)?)?.was_enqueued() {
                enqueued += 1;
            }
        }

        tracing::info!(seeds = seeds.len(), enqueued, "Seeded queue");
        Ok(enqueued)
    }

    fn push_seed(&self, task: Task) -> Result<PushOutcome, SpindleError> {
        let url = task.url().to_string();
        let outcome = self.queue.push(task)?;
        tracing::debug!(url = %url, outcome = ?outcome, "Pushed seed");
        Ok(outcome)
    }

    /// Starts the worker pool
    ///
    /// # Errors
    ///
    /// Fails if no handler is registered or the pool is already running.
    pub fn start(&mut self) -> Result<(), SpindleError> {
        if self.is_running() {
            return Err(PoolError::AlreadyRunning.into());
        }
        if self.handlers.is_empty() {
            return Err(PoolError::WorkerInitFailed("no handlers registered".to_string()).into());
        }

        let mut pool = WorkerPool::new(
            self.pool_config.clone(),
            Arc::clone(&self.queue),
            Arc::new(self.handlers.clone()),
        );
        pool.start()?;
        self.pool = Some(pool);
        Ok(())
    }

    /// Stops the worker pool and returns its final statistics
    pub async fn shutdown(&mut self) -> Result<PoolStats, SpindleError> {
        let mut pool = self.pool.take().ok_or(PoolError::NotRunning)?;
        pool.shutdown().await?;
        Ok(pool.stats())
    }

    /// Starts the workers, waits for `signal`, then shuts down
    pub async fn run_until<F>(&mut self, signal: F) -> Result<PoolStats, SpindleError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        signal.await;
        tracing::info!("Stop requested");
        self.shutdown().await
    }

    /// Fetches `url` as `document_type` and returns the tasks its handler emits
    ///
    /// Emitted tasks are resolved against the probed task but never pushed.
    pub async fn probe(&self, url: &str, document_type: &str) -> Result<Vec<Task>, SpindleError> {
        let handler = self
            .handlers
            .get(document_type)
            .ok_or_else(|| SpindleError::NoHandler(document_type.to_string()))?;

        let task = Task::builder(url)
            .document_type(document_type)
            .no_referer()
            .build()?;

        let fetcher = Fetcher::new(&self.pool_config.client)?;
        let body = fetcher.fetch(&task).await?;
        let document = Document::new(url, body);

        let children = handler
            .handle(&task, &document)
            .map_err(|source| SpindleError::Handler {
                document_type: document_type.to_string(),
                url: url.to_string(),
                source,
            })?
            .map(|mut child| {
                child.resolve_from_parent(&task);
                child
            })
            .collect();

        Ok(children)
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn is_running(&self) -> bool {
        self.pool.as_ref().map_or(false, WorkerPool::is_running)
    }

    /// Statistics of the running pool, if started
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(WorkerPool::stats)
    }
}

/// Builds the task a `[[seed]]` entry describes
fn seed_task(seed: &SeedEntry) -> Result<Task, SpindleError> {
    let mut builder = Task::builder(seed.url.as_str())
        .document_type(seed.document_type.as_str())
        .high_priority(seed.high_priority);

    builder = match &seed.referer {
        Some(referer) => builder.referer(referer.as_str()),
        None => builder.no_referer(),
    };
    if let Some(secs) = seed.interval_secs {
        builder = builder.repeat_after(Duration::from_secs(secs));
    }
    builder = match seed.min_age_secs {
        Some(0) => builder.no_min_age(),
        Some(secs) => builder.min_age(Duration::from_secs(secs)),
        None => builder,
    };

    Ok(builder.build()?)
}

/// Runs store setup off the async runtime
async fn run_blocking<T, F>(f: F) -> Result<T, SpindleError>
where
    F: FnOnce() -> Result<T, SpindleError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        SpindleError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("store setup task failed: {}", e),
        ))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::handler::LinkRuleHandler;
    use crate::storage::MemoryStore;

    fn create_test_config() -> Config {
        toml::from_str(
            r#"
            [queue]
            name = "test"
            backend = "memory"

            [[seed]]
            url = "https://example.com/"
            document-type = "index"

            [[seed]]
            url = "https://example.com/feed"
            document-type = "index"
            referer = "https://example.com/"
            interval-secs = 600
            min-age-secs = 0

            [[document-type]]
            name = "index"

              [[document-type.follow]]
              selector = "a.article"
              document-type = "article"

            [[document-type]]
            name = "article"
            "#,
        )
        .unwrap()
    }

    fn memory_crawler() -> Crawler {
        let queue = Queue::new("test", Arc::new(MemoryStore::new()));
        Crawler::new(queue, WorkerPoolConfig::new(1))
    }

    #[test]
    fn test_from_config() {
        let config = create_test_config();
        let crawler = Crawler::from_config(&config).unwrap();

        assert_eq!(crawler.queue().name(), "test");
        assert_eq!(crawler.handlers().document_types(), vec!["article", "index"]);
        assert!(!crawler.is_running());
        assert!(crawler.pool_stats().is_none());
    }

    #[test]
    fn test_seed_from_config() {
        let config = create_test_config();
        let crawler = Crawler::from_config(&config).unwrap();

        assert_eq!(crawler.seed_from_config(&config.seeds).unwrap(), 2);
        // Pushing the same seeds again changes nothing
        assert_eq!(crawler.seed_from_config(&config.seeds).unwrap(), 0);

        let feed = crawler
            .queue()
            .pending_task("https://example.com/feed")
            .unwrap()
            .unwrap();
        assert_eq!(feed.repeat_after(), Some(600));
        assert_eq!(feed.min_age(), None);
        assert_eq!(feed.referer_url(), Some("https://example.com/"));

        let root = crawler
            .queue()
            .pending_task("https://example.com/")
            .unwrap()
            .unwrap();
        assert_eq!(root.referer_url(), None);
        assert!(!root.referer().is_from_parent());
    }

    #[tokio::test]
    async fn test_open_seeded_on_current_thread_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = create_test_config();
        config.queue.backend = crate::config::StoreBackend::Sqlite;
        config.queue.sqlite_path = Some(dir.path().join("queue.db").display().to_string());

        let (crawler, enqueued) = Crawler::open_seeded(&config).await.unwrap();
        assert_eq!(enqueued, 2);
        assert_eq!(crawler.queue().stats().unwrap().normal_ready, 2);
        drop(crawler);

        let reopened = Crawler::open(&config).await.unwrap();
        assert_eq!(reopened.queue().stats().unwrap().total(), 2);
        assert_eq!(reopened.handlers().document_types(), vec!["article", "index"]);
    }

    #[test]
    fn test_add_seed() {
        let crawler = memory_crawler();

        let outcome = crawler
            .add_seed("https://example.com/", "index", None, Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(outcome, PushOutcome::Enqueued);

        let result = crawler.add_seed("https://example.com/x", "index", None, Some(Duration::ZERO));
        assert!(matches!(result, Err(SpindleError::InvalidTask(_))));
        assert_eq!(crawler.queue().stats().unwrap().total(), 1);
    }

    #[test]
    fn test_add_handler_rejects_duplicates() {
        let mut crawler = memory_crawler();
        crawler.add_handler("index", LinkRuleHandler::new()).unwrap();

        let handler = |_task: &Task, _doc: &Document| -> anyhow::Result<Vec<Task>> { Ok(vec![]) };
        let result = crawler.add_handler("index", handler);
        assert!(matches!(result, Err(SpindleError::DuplicateHandler(_))));
    }

    #[test]
    fn test_start_requires_handlers() {
        let mut crawler = memory_crawler();
        assert!(matches!(
            crawler.start(),
            Err(SpindleError::Pool(PoolError::WorkerInitFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut crawler = Crawler::new(
            Queue::new("test", Arc::new(MemoryStore::new())),
            WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(20)),
        );
        crawler.add_handler("index", LinkRuleHandler::new()).unwrap();

        crawler.start().unwrap();
        assert!(crawler.is_running());
        assert!(matches!(
            crawler.add_handler("article", LinkRuleHandler::new()),
            Err(SpindleError::Pool(PoolError::AlreadyRunning))
        ));

        let stats = crawler.shutdown().await.unwrap();
        assert_eq!(stats.num_workers, 2);
        assert!(!crawler.is_running());
        assert!(matches!(
            crawler.shutdown().await,
            Err(SpindleError::Pool(PoolError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn test_probe_unknown_document_type() {
        let crawler = memory_crawler();
        let result = crawler.probe("https://example.com/", "missing").await;
        assert!(matches!(result, Err(SpindleError::NoHandler(t)) if t == "missing"));
    }
}
