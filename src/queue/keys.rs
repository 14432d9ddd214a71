//! Store key layout for one named queue

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Every key a queue touches, all under `{name}:`
#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    prefix: String,
    priority_ready: String,
    normal_ready: String,
}

impl QueueKeys {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            prefix: format!("{}:", name),
            priority_ready: format!("{}:todo:hp", name),
            normal_ready: format!("{}:todo:nn", name),
        }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn ready_set(&self, high_priority: bool) -> &str {
        if high_priority {
            &self.priority_ready
        } else {
            &self.normal_ready
        }
    }

    pub(crate) fn task(&self, id: &str) -> String {
        format!("{}task:{}", self.prefix, id)
    }

    /// Last-crawl timestamp for a canonical URL
    pub(crate) fn last_crawl(&self, canonical_url: &str) -> String {
        format!("{}urlts:{}", self.prefix, sha256_hex(canonical_url.as_bytes()))
    }

    /// Pending-task entry for a canonical URL
    pub(crate) fn dedup(&self, canonical_url: &str) -> String {
        format!(
            "{}taskbyurl:{}",
            self.prefix,
            sha256_hex(canonical_url.as_bytes())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_key_layout() {
        let keys = QueueKeys::new("news");
        let url_hash = sha256_hex(b"https://example.com/");

        assert_eq!(keys.prefix(), "news:");
        assert_eq!(keys.ready_set(true), "news:todo:hp");
        assert_eq!(keys.ready_set(false), "news:todo:nn");
        assert_eq!(keys.task("abc"), "news:task:abc");
        assert_eq!(
            keys.last_crawl("https://example.com/"),
            format!("news:urlts:{}", url_hash)
        );
        assert_eq!(
            keys.dedup("https://example.com/"),
            format!("news:taskbyurl:{}", url_hash)
        );
    }
}
