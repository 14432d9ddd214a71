//! Worker pool that drains the task queue
//!
//! Each worker is an independent tokio task with its own HTTP client. A worker
//! loops: pop a due task, fetch it, run the handler for its document type and
//! push every emitted task back into the queue, then pause for the request
//! delay. Store round-trips run on the blocking thread pool.
//!
//! # Failure Policy
//!
//! - Empty queue: sleep the poll interval and poll again
//! - Fetch or handler failure: log, count, drop the task
//! - Retryable store error: log and back off one poll interval
//! - Fatal store error, on pop or while pushing emitted tasks: that worker
//!   stops; the others keep going
//! - Retryable store error while pushing an emitted task: retried after one
//!   poll interval, a bounded number of times

use crate::config::Config;
use crate::crawler::document::Document;
use crate::crawler::fetcher::{ClientConfig, FetchError, Fetcher};
use crate::crawler::handler::{Handler, HandlerRegistry};
use crate::queue::{PushOutcome, Queue, QueueError, QueueResult, Task};
use crate::SpindleError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Attempts per emitted task before a retryable push failure drops it
pub const MAX_PUSH_ATTEMPTS: u32 = 5;

/// Errors that can occur in the worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker initialization failed: {0}")]
    WorkerInitFailed(String),

    #[error("Pool is already running")]
    AlreadyRunning,

    #[error("Pool is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    /// How long an idle worker sleeps before polling an empty queue again
    pub poll_interval: Duration,
    /// Pause after every handled task
    pub request_delay: Duration,
    /// Upper bound on a single fetch
    pub fetch_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Settings for each worker's HTTP client
    pub client: ClientConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            poll_interval: Duration::from_secs(2),
            request_delay: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            client: ClientConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Builds the pool configuration from the `[workers]` and `[client]` sections
    pub fn from_config(config: &Config) -> Self {
        let workers = &config.workers;
        let fetch_timeout = Duration::from_secs(workers.fetch_timeout_secs);
        Self {
            num_workers: workers.count as usize,
            poll_interval: Duration::from_millis(workers.poll_interval_ms),
            request_delay: Duration::from_millis(workers.request_delay_ms),
            fetch_timeout,
            shutdown_timeout: Duration::from_secs(workers.shutdown_timeout_secs),
            client: ClientConfig::from_section(&config.client, fetch_timeout),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self.client.timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}

/// Statistics about the worker pool
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    /// Workers currently handling a task
    pub active_workers: usize,
    /// Workers still running their loop
    pub live_workers: usize,
    /// Tasks fetched and handled successfully
    pub tasks_processed: u64,
    /// Tasks dropped after a fetch or handler failure
    pub tasks_failed: u64,
    /// Follow-up tasks pushed by handlers
    pub tasks_emitted: u64,
    /// Follow-up tasks lost because the store stayed unavailable
    pub pushes_dropped: u64,
}

impl PoolStats {
    pub fn total_handled(&self) -> u64 {
        self.tasks_processed + self.tasks_failed
    }

    /// Percentage of handled tasks that succeeded
    pub fn success_rate(&self) -> f64 {
        let total = self.total_handled();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_processed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics
struct SharedPoolStats {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_emitted: AtomicU64,
    pushes_dropped: AtomicU64,
    active_workers: AtomicU64,
    live_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_processed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_emitted: AtomicU64::new(0),
            pushes_dropped: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            live_workers: AtomicU64::new(0),
        }
    }

    fn record_success(&self, summary: EmitSummary) {
        self.tasks_processed.fetch_add(1, Ordering::SeqCst);
        self.tasks_emitted.fetch_add(summary.pushed, Ordering::SeqCst);
        self.pushes_dropped.fetch_add(summary.dropped, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            live_workers: self.live_workers.load(Ordering::SeqCst) as usize,
            tasks_processed: self.tasks_processed.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            tasks_emitted: self.tasks_emitted.load(Ordering::SeqCst),
            pushes_dropped: self.pushes_dropped.load(Ordering::SeqCst),
        }
    }
}

/// What happened to the tasks a handler emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EmitSummary {
    pub pushed: u64,
    /// Dropped after `MAX_PUSH_ATTEMPTS` retryable failures
    pub dropped: u64,
}

/// True for store errors that should stop the worker instead of the task
fn is_fatal_store_error(error: &SpindleError) -> bool {
    match error {
        SpindleError::Queue(QueueError::Store(e)) | SpindleError::Store(e) => !e.is_retryable(),
        _ => false,
    }
}

/// Pushes `task`, sleeping `retry_delay` between retryable failures
fn push_with_retry(queue: &Queue, task: Task, retry_delay: Duration) -> QueueResult<PushOutcome> {
    let mut attempt = 1;
    loop {
        match queue.push(task.clone()) {
            Err(e) if e.is_retryable() && attempt < MAX_PUSH_ATTEMPTS => {
                warn!(url = %task.url(), attempt, error = %e, "Push failed, retrying");
                std::thread::sleep(retry_delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Runs a handler on a fetched document and pushes what it emits
///
/// Emitted tasks inherit document type and referer from `parent` where they
/// asked to. A push that keeps failing with a retryable error drops only that
/// task; a fatal store error stops the walk and is returned.
pub(crate) fn emit_tasks(
    queue: &Queue,
    handler: &dyn Handler,
    parent: &Task,
    document: &Document,
    retry_delay: Duration,
) -> Result<EmitSummary, SpindleError> {
    let tasks = handler
        .handle(parent, document)
        .map_err(|source| SpindleError::Handler {
            document_type: parent.document_type_name().unwrap_or_default().to_string(),
            url: parent.url().to_string(),
            source,
        })?;

    let mut summary = EmitSummary::default();
    for mut child in tasks {
        child.resolve_from_parent(parent);
        let url = child.url().to_string();
        match push_with_retry(queue, child, retry_delay) {
            Ok(outcome) => {
                debug!(parent = %parent.url(), url = %url, outcome = ?outcome, "Emitted task");
                summary.pushed += 1;
            }
            Err(e) if e.is_retryable() => {
                error!(parent = %parent.url(), url = %url, error = %e, "Dropping emitted task");
                summary.dropped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(summary)
}

/// Worker pool that manages multiple workers draining one queue
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<Queue>,
    handlers: Arc<HandlerRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<Queue>, handlers: Arc<HandlerRegistry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            handlers,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Spawns all workers
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running, or
    /// `PoolError::WorkerInitFailed` if an HTTP client cannot be built.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let mut workers = Vec::with_capacity(self.config.num_workers);
        for i in 0..self.config.num_workers {
            let fetcher = Fetcher::new(&self.config.client)
                .map_err(|e| PoolError::WorkerInitFailed(e.to_string()))?;

            workers.push(Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                handlers: Arc::clone(&self.handlers),
                fetcher,
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                request_delay: self.config.request_delay,
                fetch_timeout: self.config.fetch_timeout,
                stats: Arc::clone(&self.stats),
            });
        }

        for worker in workers {
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.queue.name(),
            "Worker pool started"
        );

        Ok(())
    }

    /// Signals every worker to stop and waits for them to finish their current task
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers that already stopped have dropped their receivers
        let _ = self.shutdown_tx.send(());

        let handles = &mut self.worker_handles;
        let shutdown_future = async {
            while let Some(handle) = handles.last_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
                handles.pop();
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(stats = ?self.stats(), "Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                let stuck = self.worker_handles.len();
                for handle in self.worker_handles.drain(..) {
                    handle.abort();
                }
                warn!(workers = stuck, "Shutdown timed out, aborted remaining workers");
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}

/// Counts a worker as live until dropped, including when its task is aborted
struct LiveWorker(Arc<SharedPoolStats>);

impl LiveWorker {
    fn register(stats: Arc<SharedPoolStats>) -> Self {
        stats.live_workers.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A single worker loop
struct Worker {
    id: String,
    queue: Arc<Queue>,
    handlers: Arc<HandlerRegistry>,
    fetcher: Fetcher,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    request_delay: Duration,
    fetch_timeout: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");
        let _live = LiveWorker::register(Arc::clone(&self.stats));

        loop {
            if !matches!(
                self.shutdown_rx.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                break;
            }

            let queue = Arc::clone(&self.queue);
            let popped = match tokio::task::spawn_blocking(move || queue.pop()).await {
                Ok(popped) => popped,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Queue pop panicked, worker stopping");
                    break;
                }
            };

            let pause = match popped {
                Ok(task) => {
                    if !self.process(task).await {
                        break;
                    }
                    self.request_delay
                }
                Err(QueueError::Empty) => {
                    debug!(worker_id = %self.id, "No tasks ready");
                    self.poll_interval
                }
                Err(e) if e.is_retryable() => {
                    warn!(worker_id = %self.id, error = %e, "Queue temporarily unavailable");
                    self.poll_interval
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Fatal queue error, worker stopping");
                    break;
                }
            };

            if self.pause(pause).await {
                break;
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Sleeps for `duration`; returns true if shutdown was signalled meanwhile
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.shutdown_rx.recv() => true,
        }
    }

    /// Handles one task; returns false when the worker must stop
    async fn process(&self, task: Task) -> bool {
        let started = Instant::now();
        self.stats.active_workers.fetch_add(1, Ordering::SeqCst);

        let result = self.handle_task(&task).await;

        self.stats.active_workers.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(summary) => {
                self.stats.record_success(summary);
                info!(
                    worker_id = %self.id,
                    url = %task.url(),
                    document_type = task.document_type_name().unwrap_or_default(),
                    emitted = summary.pushed,
                    dropped = summary.dropped,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Handled task"
                );
                true
            }
            Err(e) if is_fatal_store_error(&e) => {
                self.stats.record_failure();
                error!(
                    worker_id = %self.id,
                    url = %task.url(),
                    error = %e,
                    "Fatal store error while pushing emitted tasks, worker stopping"
                );
                false
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(
                    worker_id = %self.id,
                    url = %task.url(),
                    error = %e,
                    "Task failed, dropping"
                );
                true
            }
        }
    }

    async fn handle_task(&self, task: &Task) -> Result<EmitSummary, SpindleError> {
        let document_type = task
            .document_type_name()
            .ok_or_else(|| SpindleError::NoHandler("<unresolved>".to_string()))?;
        let handler = self
            .handlers
            .get(document_type)
            .ok_or_else(|| SpindleError::NoHandler(document_type.to_string()))?;

        let body = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(task))
            .await
            .map_err(|_| FetchError::Timeout {
                url: task.url().to_string(),
            })??;

        let document = Document::new(task.url(), body);
        let queue = Arc::clone(&self.queue);
        let parent = task.clone();
        let retry_delay = self.poll_interval;

        tokio::task::spawn_blocking(move || {
            emit_tasks(&queue, handler.as_ref(), &parent, &document, retry_delay)
        })
        .await
        .map_err(|e| SpindleError::Handler {
            document_type: document_type.to_string(),
            url: task.url().to_string(),
            source: anyhow::anyhow!("handler panicked: {}", e),
        })?
    }
}
