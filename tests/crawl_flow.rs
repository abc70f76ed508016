//! End-to-end crawl tests
//!
//! These run the full primary/worker pipeline in one process against a
//! wiremock server, with the queue in a temporary SQLite database.

use rusqlite::Connection;
use spiderpool::config::{parse_config, Config};
use spiderpool::crawler::{in_process_launcher, run_spider};
use spiderpool::storage::{SqliteStorage, Storage};
use spiderpool::{CrawlItemState, Priority};
use std::collections::HashMap;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a single-worker configuration with no request pacing
fn create_test_config(db_path: &str) -> Config {
    parse_config(&format!(
        r#"
[spider]
database-file = '{}'
workers = 1

[http.min-time-between-requests]
default = 0

[user-agent]
crawler-name = "testbot"
crawler-version = "1.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"
"#,
        db_path
    ))
    .expect("Failed to parse test config")
}

/// Opens a fresh database with `seed` queued and its host blessed
fn create_test_storage(dir: &TempDir, seed: &Url) -> (SqliteStorage, String) {
    let db_path = dir.path().join("queue.db");
    let mut storage = SqliteStorage::new(&db_path).expect("Failed to create storage");

    let host = seed.host_str().expect("Seed has no host").to_string();
    storage
        .mark_domains_ok_to_spider(&[host], true)
        .expect("Failed to bless host");
    storage
        .enqueue(seed, Priority::High, false)
        .expect("Failed to enqueue seed");

    (storage, db_path.to_string_lossy().into_owned())
}

/// Every queue row, consumed or not, as url -> stored priority
fn queued_priorities(db_path: &str) -> HashMap<String, i64> {
    let conn = Connection::open(db_path).expect("Failed to reopen database");
    let mut stmt = conn
        .prepare(
            "SELECT urls.url, queue.priority FROM queue
             INNER JOIN urls ON urls.id = queue.url_id",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<HashMap<String, i64>, _>>()
        .unwrap();
    rows
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/plain"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_single_page() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    r#"<html><body>
                    <a href="http://Elsewhere.Example.com/a#top">A</a>
                    <a href="https://elsewhere.example.com/a">A again</a>
                    <a href="https://another.example.org/b">B</a>
                    </body></html>"#,
                    "text/html",
                ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seed = Url::parse(&format!("{}/", server.uri())).unwrap();
    let (storage, db_path) = create_test_storage(&dir, &seed);
    let config = create_test_config(&db_path);

    let primary = run_spider(config, storage, in_process_launcher(), false)
        .await
        .expect("Crawl failed");

    let fetched = primary
        .storage()
        .most_recent_fetch(seed.as_str())
        .unwrap()
        .expect("Seed page was not recorded");
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.content_type, "text/html");

    assert_eq!(
        primary.progress().state_of(1),
        Some(CrawlItemState::Spidered)
    );

    // Both discovered links were queued, then consumed as not ok to spider
    let status = primary.storage().queue_status().unwrap();
    assert_eq!(status.processed, 3);
    assert_eq!(status.pending(), 0);

    let queued = queued_priorities(&db_path);
    assert_eq!(queued.len(), 3);
    assert_eq!(queued[seed.as_str()], Priority::High.to_db());
    assert_eq!(queued["https://elsewhere.example.com/a"], Priority::Medium.to_db());
    assert_eq!(queued["https://another.example.org/b"], Priority::Medium.to_db());

    for host in ["elsewhere.example.com", "another.example.org"] {
        let policy = primary.storage().domain_policy(host).unwrap();
        assert!(policy.known, "{} should be registered", host);
        assert_eq!(policy.ok_to_spider, None);
    }
}

#[tokio::test]
async fn test_robots_disallow_skips_requests() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /private/").await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seed = Url::parse(&format!("{}/private/page", server.uri())).unwrap();
    let (storage, db_path) = create_test_storage(&dir, &seed);
    let config = create_test_config(&db_path);

    let primary = run_spider(config, storage, in_process_launcher(), false)
        .await
        .expect("Crawl failed");

    assert!(primary
        .storage()
        .most_recent_fetch(seed.as_str())
        .unwrap()
        .is_none());

    let status = primary.storage().queue_status().unwrap();
    assert_eq!(status.processed, 1);
    assert_eq!(status.pending(), 0);

    // Only a root-path disallow ignores the whole domain
    let host = seed.host_str().unwrap();
    assert_eq!(
        primary.storage().domain_policy(host).unwrap().ok_to_spider,
        Some(true)
    );
}

#[tokio::test]
async fn test_get_errors_are_retried_then_given_up() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /").await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&server)
        .await;

    // HEAD claims HTML but GET returns a rejected content type, which is a GET error
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("%PDF-1.4", "application/pdf"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seed = Url::parse(&format!("{}/broken", server.uri())).unwrap();
    let (storage, db_path) = create_test_storage(&dir, &seed);
    let config = create_test_config(&db_path);

    let primary = run_spider(config, storage, in_process_launcher(), false)
        .await
        .expect("Crawl failed");

    assert!(primary
        .storage()
        .most_recent_fetch(seed.as_str())
        .unwrap()
        .is_none());

    let status = primary.storage().queue_status().unwrap();
    assert_eq!(status.processed, 1);
    assert_eq!(status.pending(), 0);
}
