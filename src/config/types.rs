use serde::Deserialize;

/// Main configuration structure for Spindle
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
    #[serde(default, rename = "document-type")]
    pub document_types: Vec<DocumentTypeEntry>,
}

/// Which store backend holds the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
    Redis,
}

/// Queue and store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Namespace prefix for every key this queue writes
    pub name: String,

    pub backend: StoreBackend,

    /// Path to the SQLite database file (sqlite backend)
    #[serde(default, rename = "sqlite-path")]
    pub sqlite_path: Option<String>,

    /// Redis connection URL (redis backend)
    #[serde(default, rename = "redis-url")]
    pub redis_url: Option<String>,

    /// Normalize URLs before dedup instead of comparing them verbatim
    #[serde(default)]
    pub canonicalize: bool,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent workers
    #[serde(default = "default_worker_count")]
    pub count: u32,

    /// How long an idle worker waits before polling an empty queue again (milliseconds)
    #[serde(default = "default_poll_interval_ms", rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Pause each worker takes after every task (milliseconds)
    #[serde(default = "default_request_delay_ms", rename = "request-delay-ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_fetch_timeout_secs", rename = "fetch-timeout-secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout_secs", rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            request_delay_ms: default_request_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_worker_count() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    #[serde(default, rename = "user-agent")]
    pub user_agent: Option<String>,

    /// Send `DNT: 1` with every request; on unless turned off
    #[serde(default = "default_do_not_track", rename = "do-not-track")]
    pub do_not_track: bool,

    /// Upstream proxy URL applied to all requests
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            user_agent: None,
            do_not_track: default_do_not_track(),
            proxy: None,
        }
    }
}

fn default_do_not_track() -> bool {
    true
}

/// A seed task pushed at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub url: String,

    #[serde(rename = "document-type")]
    pub document_type: String,

    #[serde(default)]
    pub referer: Option<String>,

    #[serde(default, rename = "high-priority")]
    pub high_priority: bool,

    /// Recrawl the seed this many seconds after each pop
    #[serde(default, rename = "interval-secs")]
    pub interval_secs: Option<u64>,

    /// Overrides the default minimum spacing between crawls of this URL
    #[serde(default, rename = "min-age-secs")]
    pub min_age_secs: Option<u64>,
}

/// A document type whose handler follows links matched by CSS selectors
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTypeEntry {
    pub name: String,

    #[serde(default)]
    pub follow: Vec<FollowRule>,
}

/// Links matching `selector` become tasks of `document_type`
#[derive(Debug, Clone, Deserialize)]
pub struct FollowRule {
    pub selector: String,

    #[serde(rename = "document-type")]
    pub document_type: String,
}
