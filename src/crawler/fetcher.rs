//! HTTP fetcher implementation
//!
//! Each worker owns one [`Fetcher`]. It wraps a reqwest client configured with
//! the crawler's user agent, an optional upstream proxy, an optional
//! `DNT: 1` header and a bounded request timeout.

use crate::config::ClientSection;
use crate::queue::{Method, Task};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, Proxy, RequestBuilder};
use std::time::Duration;
use thiserror::Error;

/// User agent sent when the configuration does not name one
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; spindle/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Errors raised while fetching a document
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Settings for building a [`Fetcher`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Send `DNT: 1` with every request
    pub do_not_track: bool,
    /// Upstream proxy for all schemes
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            do_not_track: true,
            proxy: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Builds the client settings from the `[client]` section
    pub fn from_section(section: &ClientSection, timeout: Duration) -> Self {
        Self {
            user_agent: section
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            do_not_track: section.do_not_track,
            proxy: section.proxy.clone(),
            timeout,
        }
    }
}

/// HTTP client used by one worker
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Builds a fetcher
    ///
    /// # Returns
    ///
    /// * `Ok(Fetcher)` - Client ready to use
    /// * `Err(FetchError::Client)` - Invalid proxy URL or TLS backend failure
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if config.do_not_track {
            headers.insert("DNT", HeaderValue::from_static("1"));
        }

        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str()).map_err(FetchError::Client)?);
        }

        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// GETs `url` and returns the body text
    ///
    /// `headers` are added to the request as given; invalid names or values
    /// surface as a request error.
    pub async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(url, request, referer).await
    }

    /// Performs the request a task describes: GET, or POST with its form data
    pub async fn fetch(&self, task: &Task) -> Result<String, FetchError> {
        match task.method() {
            Method::Get => self.get(task.url(), task.referer_url(), &[]).await,
            Method::Post => {
                let request = self.client.post(task.url()).form(task.data());
                self.send(task.url(), request, task.referer_url()).await
            }
        }
    }

    async fn send(
        &self,
        url: &str,
        mut request: RequestBuilder,
        referer: Option<&str>,
    ) -> Result<String, FetchError> {
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_fetcher() {
        let fetcher = Fetcher::new(&ClientConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_default_user_agent_names_crawler() {
        assert!(DEFAULT_USER_AGENT.starts_with("Mozilla/5.0 (compatible; spindle/"));
    }

    #[test]
    fn test_from_section() {
        let section = ClientSection {
            user_agent: Some("TestBot/1.0".to_string()),
            do_not_track: true,
            proxy: Some("http://127.0.0.1:3128".to_string()),
        };
        let config = ClientConfig::from_section(&section, Duration::from_secs(5));

        assert_eq!(config.user_agent, "TestBot/1.0");
        assert!(config.do_not_track);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(Fetcher::new(&config).is_ok());

        let config = ClientConfig::from_section(&ClientSection::default(), Duration::from_secs(5));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.proxy.is_none());
        assert!(config.do_not_track);
    }

    #[test]
    fn test_do_not_track_on_by_default() {
        assert!(ClientConfig::default().do_not_track);
        assert!(ClientSection::default().do_not_track);
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let config = ClientConfig {
            proxy: Some("not a proxy".to_string()),
            ..ClientConfig::default()
        };
        assert!(matches!(Fetcher::new(&config), Err(FetchError::Client(_))));
    }

    // Request/response behaviour is exercised against wiremock in the integration tests
}
