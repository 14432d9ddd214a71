//! URL handling module for Spindle
//!
//! The queue deduplicates tasks by URL. Which URLs count as "the same" is
//! decided by a [`Canonicalizer`]; by default URLs are compared verbatim.

mod normalize;

pub use normalize::normalize_url;

use tracing::trace;

/// Maps a URL to the canonical form used for dedup and recrawl bookkeeping
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, url: &str) -> String;
}

/// Compares URLs exactly as given
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCanonicalizer;

impl Canonicalizer for IdentityCanonicalizer {
    fn canonicalize(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Canonicalizes with [`normalize_url`]
///
/// URLs that cannot be normalized (non-http schemes, garbage) are used
/// verbatim so they still dedup against themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizingCanonicalizer;

impl Canonicalizer for NormalizingCanonicalizer {
    fn canonicalize(&self, url: &str) -> String {
        match normalize_url(url) {
            Ok(normalized) => normalized.into(),
            Err(e) => {
                trace!(url = %url, error = %e, "URL left as-is by canonicalizer");
                url.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keeps_url() {
        let url = "https://Example.com/a/?b=1#c";
        assert_eq!(IdentityCanonicalizer.canonicalize(url), url);
    }

    #[test]
    fn test_normalizing_merges_variants() {
        let canon = NormalizingCanonicalizer;
        assert_eq!(
            canon.canonicalize("https://www.example.com/a/"),
            canon.canonicalize("https://EXAMPLE.com/a?utm_source=feed#top")
        );
    }

    #[test]
    fn test_normalizing_falls_back_to_input() {
        assert_eq!(
            NormalizingCanonicalizer.canonicalize("mailto:someone@example.com"),
            "mailto:someone@example.com"
        );
    }
}
