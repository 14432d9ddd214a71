//! Integration tests for the task queue
//!
//! Every scenario runs against the in-memory store and a SQLite file, through
//! the public API only. SQLite tests also open the same file twice to stand in
//! for separate processes sharing one queue.

use spindle::config::load_config;
use spindle::queue::{QueueError, DEFAULT_MIN_AGE_SECS};
use spindle::{Crawler, MemoryStore, PushOutcome, Queue, SqliteStore, Store, Task};
use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

const NOW: i64 = 1_700_000_000;

/// One store per backend; the TempDir keeps the SQLite file alive
fn backends() -> Vec<(&'static str, Arc<dyn Store>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteStore::new(&dir.path().join("queue.db")).unwrap();
    vec![
        ("memory", Arc::new(MemoryStore::new()), None),
        ("sqlite", Arc::new(sqlite), Some(dir)),
    ]
}

fn task(url: &str) -> Task {
    Task::new(url, "page")
}

#[test]
fn test_push_pop_round_trip() {
    for (backend, store, _dir) in backends() {
        let queue = Queue::new("crawl", store);
        let pushed = Task::builder("https://example.com/search")
            .document_type("results")
            .referer("https://example.com/")
            .form_field("q", "rust")
            .form_field("page", "2")
            .build()
            .unwrap();

        queue.push(pushed.clone()).unwrap();
        let popped = queue.pop_at(NOW).unwrap();

        assert_eq!(popped, pushed, "backend: {}", backend);
        assert!(matches!(queue.pop_at(NOW), Err(QueueError::Empty)), "backend: {}", backend);
    }
}

#[test]
fn test_duplicate_urls_pop_once() {
    for (backend, store, _dir) in backends() {
        let queue = Queue::new("crawl", store);

        assert_eq!(queue.push(task("https://example.com/a")).unwrap(), PushOutcome::Enqueued);
        assert_eq!(queue.push(task("https://example.com/a")).unwrap(), PushOutcome::Superseded);
        queue.push(task("https://example.com/b")).unwrap();

        let mut urls = HashSet::new();
        while let Ok(task) = queue.pop_at(NOW) {
            assert!(urls.insert(task.url().to_string()), "backend: {}", backend);
        }
        assert_eq!(urls.len(), 2, "backend: {}", backend);
    }
}

#[test]
fn test_priority_evicts_and_shields() {
    for (backend, store, _dir) in backends() {
        let queue = Queue::new("crawl", store);
        let url = "https://example.com/breaking";

        let deferred = Task::builder(url)
            .document_type("old")
            .scheduled_at(NOW + 60)
            .build()
            .unwrap();
        queue.push(deferred).unwrap();
        let urgent = Task::builder(url)
            .document_type("urgent")
            .high_priority(true)
            .build()
            .unwrap();
        assert_eq!(queue.push(urgent).unwrap(), PushOutcome::Replaced);
        assert_eq!(queue.push(task(url)).unwrap(), PushOutcome::Shielded);

        let stats = queue.stats().unwrap();
        assert_eq!((stats.priority_ready, stats.normal_ready), (1, 0), "backend: {}", backend);

        let popped = queue.pop_at(NOW).unwrap();
        assert_eq!(popped.document_type_name(), Some("urgent"), "backend: {}", backend);
        assert!(matches!(queue.pop_at(NOW + 3600 * 2), Err(QueueError::Empty)));
    }
}

#[test]
fn test_min_age_defers_recrawl() {
    for (backend, store, _dir) in backends() {
        let queue = Queue::new("crawl", store);
        let url = "https://example.com/page";

        queue.push(task(url)).unwrap();
        queue.pop_at(NOW).unwrap();
        assert_eq!(queue.last_crawl(url).unwrap(), Some(NOW), "backend: {}", backend);

        queue.push(task(url)).unwrap();
        let due = NOW + DEFAULT_MIN_AGE_SECS as i64;
        assert!(matches!(queue.pop_at(due - 1), Err(QueueError::Empty)), "backend: {}", backend);
        assert_eq!(queue.pop_at(due).unwrap().url(), url);

        // Without min_age the URL is due right away
        queue
            .push(Task::builder(url).document_type("page").no_min_age().build().unwrap())
            .unwrap();
        assert!(queue.pop_at(due).is_ok(), "backend: {}", backend);
    }
}

#[test]
fn test_repeating_task_is_rescheduled() {
    for (backend, store, _dir) in backends() {
        let queue = Queue::new("crawl", store);
        let feed = Task::builder("https://example.com/feed")
            .document_type("feed")
            .repeat_after(Duration::from_secs(900))
            .no_min_age()
            .build()
            .unwrap();

        queue.push(feed).unwrap();
        queue.pop_at(NOW).unwrap();

        assert!(matches!(queue.pop_at(NOW + 899), Err(QueueError::Empty)), "backend: {}", backend);
        let again = queue.pop_at(NOW + 900).unwrap();
        assert_eq!(again.repeat_after(), Some(900));
        assert!(!again.high_priority());
    }
}

#[test]
fn test_queues_are_namespaced() {
    for (backend, store, _dir) in backends() {
        let news = Queue::new("news", Arc::clone(&store));
        let shop = Queue::new("shop", store);

        news.push(task("https://example.com/")).unwrap();
        shop.push(task("https://example.com/")).unwrap();

        assert!(news.clear().unwrap() > 0, "backend: {}", backend);
        assert!(matches!(news.pop_at(NOW), Err(QueueError::Empty)));
        assert_eq!(shop.pop_at(NOW).unwrap().url(), "https://example.com/");
    }
}

#[test]
fn test_shared_sqlite_file_claims_exactly_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let seeder = Queue::new("crawl", Arc::new(SqliteStore::new(&path).unwrap()));
    for i in 0..60 {
        seeder.push(task(&format!("https://example.com/{}", i))).unwrap();
    }

    // Each thread opens its own connection, like a separate process would
    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = Queue::new("crawl", Arc::new(SqliteStore::new(&path).unwrap()));
                barrier.wait();
                let mut urls = Vec::new();
                loop {
                    match queue.pop_at(NOW) {
                        Ok(task) => urls.push(task.url().to_string()),
                        Err(QueueError::Empty) => break,
                        Err(e) => panic!("pop failed: {}", e),
                    }
                }
                urls
            })
        })
        .collect();

    let all: Vec<String> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(all.len(), 60);

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(unique.len(), 60);
}

#[test]
fn test_config_driven_sqlite_queue_persists() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[queue]
name = "persisted"
backend = "sqlite"
sqlite-path = "{}"

[[seed]]
url = "https://example.com/"
document-type = "index"

[[seed]]
url = "https://example.com/breaking"
document-type = "index"
high-priority = true

[[document-type]]
name = "index"
"#,
        db_path.display()
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    {
        let crawler = Crawler::from_config(&config).unwrap();
        assert_eq!(crawler.seed_from_config(&config.seeds).unwrap(), 2);
    }

    let reopened = Crawler::from_config(&config).unwrap();
    let stats = reopened.queue().stats().unwrap();
    assert_eq!((stats.priority_ready, stats.normal_ready), (1, 1));

    let first = reopened.queue().pop().unwrap();
    assert_eq!(first.url(), "https://example.com/breaking");
    assert!(first.referer().explicit().is_some());
}
