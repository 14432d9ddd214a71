use crate::config::types::{
    ClientSection, Config, DocumentTypeEntry, QueueConfig, SeedEntry, StoreBackend, WorkersConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_queue_config(&config.queue)?;
    validate_workers_config(&config.workers)?;
    validate_client_config(&config.client)?;
    let known_types = validate_document_types(&config.document_types)?;
    validate_seeds(&config.seeds, &known_types)?;
    Ok(())
}

/// Validates queue configuration
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation(
            "queue name cannot be empty".to_string(),
        ));
    }

    if config.name.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "queue name cannot contain whitespace, got '{}'",
            config.name
        )));
    }

    match config.backend {
        StoreBackend::Memory => {}
        StoreBackend::Sqlite => {
            if config.sqlite_path.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Validation(
                    "sqlite backend requires sqlite-path".to_string(),
                ));
            }
        }
        StoreBackend::Redis => {
            let redis_url = config.redis_url.as_deref().unwrap_or_default();
            let url = Url::parse(redis_url)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis-url: {}", e)))?;

            if !matches!(url.scheme(), "redis" | "rediss" | "redis+unix") {
                return Err(ConfigError::Validation(format!(
                    "redis-url must use a redis:// or rediss:// scheme, got '{}'",
                    redis_url
                )));
            }
        }
    }

    Ok(())
}

/// Validates worker pool configuration
fn validate_workers_config(config: &WorkersConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 100 {
        return Err(ConfigError::Validation(format!(
            "worker count must be between 1 and 100, got {}",
            config.count
        )));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll-interval-ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.fetch_timeout_secs < 1 || config.fetch_timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "fetch-timeout-secs must be between 1 and 600, got {}",
            config.fetch_timeout_secs
        )));
    }

    Ok(())
}

/// Validates HTTP client configuration
fn validate_client_config(config: &ClientSection) -> Result<(), ConfigError> {
    if let Some(user_agent) = &config.user_agent {
        if user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user-agent cannot be blank".to_string(),
            ));
        }
    }

    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

/// Validates document types and their follow rules, returning the declared names
fn validate_document_types(entries: &[DocumentTypeEntry]) -> Result<HashSet<&str>, ConfigError> {
    let mut names = HashSet::new();

    for entry in entries {
        if entry.name.is_empty() {
            return Err(ConfigError::Validation(
                "document-type name cannot be empty".to_string(),
            ));
        }

        if !names.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "document-type '{}' is declared more than once",
                entry.name
            )));
        }
    }

    for entry in entries {
        for rule in &entry.follow {
            Selector::parse(&rule.selector).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid selector '{}' in document-type '{}': {:?}",
                    rule.selector, entry.name, e
                ))
            })?;

            if !names.contains(rule.document_type.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "document-type '{}' follows links into undeclared type '{}'",
                    entry.name, rule.document_type
                )));
            }
        }
    }

    Ok(names)
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry], known_types: &HashSet<&str>) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(&seed.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed.url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed.url
            )));
        }

        if !known_types.contains(seed.document_type.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Seed '{}' uses undeclared document-type '{}'",
                seed.url, seed.document_type
            )));
        }

        if let Some(referer) = &seed.referer {
            Url::parse(referer).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid referer '{}': {}", referer, e))
            })?;
        }

        if seed.interval_secs == Some(0) {
            return Err(ConfigError::Validation(format!(
                "Seed '{}' interval-secs must be > 0",
                seed.url
            )));
        }
    }

    Ok(())
}
