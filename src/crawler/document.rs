//! Fetched documents handed to handlers
//!
//! A [`Document`] is the raw body of a fetched URL with lazy views over it:
//! JSON decoding, an HTML tree, and CSS-selector link extraction.

use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Invalid CSS selector '{0}'")]
    InvalidSelector(String),

    #[error("Document URL '{0}' is not absolute")]
    InvalidBaseUrl(String),
}

/// The body of a fetched URL
#[derive(Debug, Clone)]
pub struct Document {
    url: String,
    body: String,
}

impl Document {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }

    /// The URL the document was fetched from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The raw response body
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Decodes the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// Parses the body as an HTML document
    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// The trimmed `<title>` text, if present and non-empty
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.html()
            .select(&selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Absolute http(s) URLs from the `href` of every element matching `selector`
    ///
    /// # Example
    ///
    /// ```
    /// use spindle::Document;
    ///
    /// let doc = Document::new(
    ///     "https://example.com/news/",
    ///     r#"<ul><li><a class="story" href="1.html">One</a></li></ul>"#,
    /// );
    /// let links = doc.extract_links("a.story").unwrap();
    /// assert_eq!(links, vec!["https://example.com/news/1.html"]);
    /// ```
    pub fn extract_links(&self, selector: &str) -> Result<Vec<String>, DocumentError> {
        let selector = Selector::parse(selector)
            .map_err(|_| DocumentError::InvalidSelector(selector.to_string()))?;
        self.select_links(&selector)
    }

    /// Like [`extract_links`](Self::extract_links) with a pre-parsed selector
    ///
    /// Duplicates are removed, keeping document order.
    pub fn select_links(&self, selector: &Selector) -> Result<Vec<String>, DocumentError> {
        let base_url =
            Url::parse(&self.url).map_err(|_| DocumentError::InvalidBaseUrl(self.url.clone()))?;

        let html = self.html();
        let mut seen = HashSet::new();
        let links = html
            .select(selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_link(href, &base_url))
            .filter(|link| seen.insert(link.clone()))
            .collect();

        Ok(links)
    }
}

/// Resolves an href against the document URL
///
/// Returns None for script, mail, phone and data links, same-page anchors,
/// and anything that does not resolve to http(s).
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.into())
}
