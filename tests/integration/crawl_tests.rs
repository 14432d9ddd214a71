//! Integration tests for fetching and crawling
//!
//! These tests use wiremock to create mock HTTP servers and exercise the
//! fetcher, the worker pool and the crawler facade end-to-end.

use spindle::crawler::{
    ClientConfig, FetchError, Fetcher, LinkRuleHandler, WorkerPoolConfig, DEFAULT_USER_AGENT,
};
use spindle::queue::Method;
use spindle::{Crawler, Document, MemoryStore, Queue, SpindleError, Task};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pool settings fast enough for tests
fn create_test_pool_config(workers: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new(workers)
        .with_poll_interval(Duration::from_millis(20))
        .with_request_delay(Duration::ZERO)
        .with_fetch_timeout(Duration::from_secs(5))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn create_test_crawler(workers: usize) -> Crawler {
    let queue = Queue::new("test", Arc::new(MemoryStore::new()));
    Crawler::new(queue, create_test_pool_config(workers))
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// Waits until the pool has handled `expected` tasks, or panics after a few seconds
async fn wait_for_handled(crawler: &Crawler, expected: u64) {
    for _ in 0..250 {
        let handled = crawler
            .pool_stats()
            .map(|stats| stats.total_handled())
            .unwrap_or(0);
        if handled >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pool did not handle {} tasks in time", expected);
}

#[tokio::test]
async fn test_fetch_sends_referer_and_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("referer", "https://example.com/"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .and(header("x-test", "yes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = Fetcher::new(&ClientConfig::default()).unwrap();
    let url = format!("{}/page", mock_server.uri());
    let body = fetcher
        .get(&url, Some("https://example.com/"), &[("x-test", "yes")])
        .await
        .unwrap();

    assert_eq!(body, "hello");
}

#[tokio::test]
async fn test_fetch_do_not_track_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("dnt", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tracked not"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = ClientConfig {
        user_agent: "TestBot/1.0".to_string(),
        do_not_track: true,
        ..ClientConfig::default()
    };
    let fetcher = Fetcher::new(&config).unwrap();
    let body = fetcher.get(&mock_server.uri(), None, &[]).await.unwrap();

    assert_eq!(body, "tracked not");
}

#[tokio::test]
async fn test_fetch_task_posts_form_data() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_string_contains("q=rust"))
        .respond_with(ResponseTemplate::new(200).set_body_string("results"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let task = Task::builder(format!("{}/search", mock_server.uri()))
        .document_type("results")
        .method(Method::Post)
        .form_field("q", "rust")
        .build()
        .unwrap();

    let fetcher = Fetcher::new(&ClientConfig::default()).unwrap();
    assert_eq!(fetcher.fetch(&task).await.unwrap(), "results");
}

#[tokio::test]
async fn test_fetch_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let fetcher = Fetcher::new(&ClientConfig::default()).unwrap();
    let result = fetcher.get(&mock_server.uri(), None, &[]).await;

    assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
}

#[tokio::test]
async fn test_fetch_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let config = ClientConfig {
        timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    let fetcher = Fetcher::new(&config).unwrap();
    let result = fetcher.get(&mock_server.uri(), None, &[]).await;

    assert!(matches!(result, Err(FetchError::Timeout { .. })));
}

#[tokio::test]
async fn test_crawl_follows_links_and_drains_queue() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        format!(
            r#"<html><body>
            <a class="article" href="/a">A</a>
            <a class="article" href="{}/b">B</a>
            <a class="article" href="/a#comments">A again</a>
            <a href="/ignored">Not an article</a>
            </body></html>"#,
            base_url
        ),
    )
    .await;
    let root = format!("{}/", base_url);

    // Articles must be requested with the index page as referer
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(header("referer", root.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>A</body></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/b", "<html><body>B</body></html>".to_string()).await;

    let mut crawler = create_test_crawler(2);
    crawler
        .add_handler("index", LinkRuleHandler::new().follow("a.article", "article").unwrap())
        .unwrap();
    crawler.add_handler("article", LinkRuleHandler::new()).unwrap();

    crawler.add_seed(&root, "index", None, None).unwrap();

    crawler.start().unwrap();
    wait_for_handled(&crawler, 3).await;
    let stats = crawler.shutdown().await.unwrap();

    assert_eq!(stats.tasks_processed, 3);
    assert_eq!(stats.tasks_failed, 0);
    assert_eq!(stats.tasks_emitted, 2);
    assert_eq!(crawler.queue().stats().unwrap().total(), 0);

    // Crawled URLs are remembered for the minimum recrawl interval
    assert!(crawler.queue().last_crawl(&root).unwrap().is_some());
    assert!(crawler
        .queue()
        .last_crawl(&format!("{}/a", base_url))
        .unwrap()
        .is_some());
    assert!(crawler
        .queue()
        .last_crawl(&format!("{}/ignored", base_url))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_crawl_drops_failed_tasks() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/ok", "<html></html>".to_string()).await;
    mount_page(&mock_server, "/broken", "<html></html>".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let mut crawler = create_test_crawler(1);
    crawler.add_handler("page", LinkRuleHandler::new()).unwrap();
    crawler
        .add_handler("fragile", |_task: &Task, _doc: &Document| -> anyhow::Result<Vec<Task>> {
            anyhow::bail!("unexpected layout")
        })
        .unwrap();

    crawler
        .add_seed(&format!("{}/ok", base_url), "page", None, None)
        .unwrap();
    crawler
        .add_seed(&format!("{}/missing", base_url), "page", None, None)
        .unwrap();
    crawler
        .add_seed(&format!("{}/broken", base_url), "fragile", None, None)
        .unwrap();

    crawler.start().unwrap();
    wait_for_handled(&crawler, 3).await;
    let stats = crawler.shutdown().await.unwrap();

    assert_eq!(stats.tasks_processed, 1);
    assert_eq!(stats.tasks_failed, 2);
    assert_eq!(crawler.queue().stats().unwrap().total(), 0);
}

#[tokio::test]
async fn test_crawl_reschedules_repeating_seed() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/feed", "<html></html>".to_string()).await;

    let mut crawler = create_test_crawler(1);
    crawler.add_handler("feed", LinkRuleHandler::new()).unwrap();

    let feed = format!("{}/feed", mock_server.uri());
    crawler
        .add_seed(&feed, "feed", None, Some(Duration::from_secs(3600)))
        .unwrap();

    crawler.start().unwrap();
    wait_for_handled(&crawler, 1).await;
    crawler.shutdown().await.unwrap();

    let next = crawler.queue().pending_task(&feed).unwrap().unwrap();
    assert!(next.scheduled_timestamp() > chrono::Utc::now().timestamp() + 3000);
    assert!(!next.high_priority());
    assert_eq!(crawler.queue().stats().unwrap().normal_ready, 1);
}

#[tokio::test]
async fn test_probe_returns_tasks_without_queueing() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/list",
        r#"<a class="item" href="/item/1">1</a><a class="item" href="/item/2">2</a>"#.to_string(),
    )
    .await;

    let mut crawler = create_test_crawler(1);
    crawler
        .add_handler("list", LinkRuleHandler::new().follow("a.item", "item").unwrap())
        .unwrap();

    let list = format!("{}/list", base_url);
    let tasks = crawler.probe(&list, "list").await.unwrap();

    let urls: Vec<String> = tasks.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(
        urls,
        vec![format!("{}/item/1", base_url), format!("{}/item/2", base_url)]
    );
    assert!(tasks
        .iter()
        .all(|t| t.document_type_name() == Some("item") && t.referer_url() == Some(list.as_str())));
    assert_eq!(crawler.queue().stats().unwrap().total(), 0);
}

#[tokio::test]
async fn test_probe_reports_handler_failure() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/", "<html></html>".to_string()).await;

    let mut crawler = create_test_crawler(1);
    crawler
        .add_handler("index", |_task: &Task, _doc: &Document| -> anyhow::Result<Vec<Task>> {
            anyhow::bail!("no listing found")
        })
        .unwrap();

    let result = crawler.probe(&mock_server.uri(), "index").await;
    assert!(matches!(result, Err(SpindleError::Handler { .. })));
}
