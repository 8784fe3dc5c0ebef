//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for a listing site and run complete
//! crawl sessions against a temporary SQLite database.

use carsweep::config::{parse_config, validate, Config};
use carsweep::crawler::Coordinator;
use carsweep::site::{CoreListing, DubizzleDetail, ExtractedRecord, SiteDetail};
use carsweep::storage::{RecordSink, RunStatus, SqliteStorage};
use carsweep::StopReason;
use chrono::Utc;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING_PATH: &str = "/en/vehicles/cars-for-sale/";

/// Builds a config pointed at the mock server with tiny delays
fn test_config(base_url: &str, db_path: &Path, mode: &str, extra: &str) -> Config {
    let toml = format!(
        r#"
[crawler]
site = "dubizzle"
mode = "{mode}"
base-url = "{base_url}"
concurrency = 4
request-timeout-secs = 5
stall-timeout-secs = 20
{extra}

[retry]
base-delay-ms = 1
max-delay-ms = 5
think-chance = 0.0

[output]
database-path = "{db}"
"#,
        mode = mode,
        base_url = base_url,
        extra = extra,
        db = db_path.display()
    );
    parse_config(&toml).expect("test config is valid")
}

fn listing_page(ids: &[u32]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li aria-label="Listing"><a href="/en/ad/test-car-ID{id}.html">Car {id}</a></li>"#
            )
        })
        .collect();
    format!("<html><body><h1>Cars for sale</h1><ul>{items}</ul></body></html>")
}

fn detail_page(id: u32) -> String {
    format!(
        r#"<html><head>
        <script type="application/ld+json">
        {{"@type": "Car", "name": "Test Car {id}", "sku": "{id}",
          "brand": {{"@type": "Brand", "name": "Toyota"}}, "model": "Camry", "modelDate": "2020"}}
        </script>
        <script>window['dataLayer'].push({{"price": "50000", "currency_unit": "SAR", "mileage": 1000}});</script>
        </head><body><h1>Test Car {id}</h1></body></html>"#
    )
}

const STUB_PAGE: &str = r#"<html><body><div id="app"></div></body></html>"#;

async fn mount_listing(server: &MockServer, page: u32, ids: &[u32]) {
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(ids)))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, id: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/en/ad/test-car-ID{}.html", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(id)))
        .mount(server)
        .await;
}

fn stored_record(id: u32, base_url: &str) -> ExtractedRecord {
    ExtractedRecord {
        core: CoreListing::new(
            &id.to_string(),
            &format!("{}/en/ad/test-car-ID{}.html", base_url, id),
            "Dubizzle",
            Utc::now(),
        ),
        detail: SiteDetail::Dubizzle(DubizzleDetail::default()),
    }
}

#[tokio::test]
async fn test_incremental_crawl_stops_at_circuit_breaker() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    // Ads on pages 2 and 3 were harvested by an earlier session
    {
        let mut storage = SqliteStorage::new(&db_path).unwrap();
        for id in [201, 202, 203, 301, 302, 303] {
            storage.upsert(&stored_record(id, &base_url)).unwrap();
        }
    }

    mount_listing(&server, 1, &[101, 102, 103, 104, 105]).await;
    mount_listing(&server, 2, &[201, 202, 203]).await;
    mount_listing(&server, 3, &[301, 302, 303]).await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[401])))
        .expect(0)
        .mount(&server)
        .await;
    for id in 101..=105 {
        mount_detail(&server, id).await;
    }

    let config = test_config(&base_url, &db_path, "incremental", "empty-page-threshold = 2");
    let coordinator = Coordinator::new(config, "test-hash".to_string()).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.stop_reason, StopReason::CircuitBreaker);
    assert_eq!(report.seeded_ids, 6);
    assert_eq!(report.last_page, 3);
    assert_eq!(report.totals.pages_fetched, 3);
    assert_eq!(report.totals.new_items, 5);
    assert_eq!(report.totals.records_saved, 5);
    assert!(!report.is_error());

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_listings(Some("Dubizzle")).unwrap(), 11);
    assert_eq!(storage.count_details("Dubizzle").unwrap(), 11);

    let listing = storage.get_listing("103").unwrap().unwrap();
    assert_eq!(listing.title.as_deref(), Some("Test Car 103"));
    assert_eq!(listing.brand.as_deref(), Some("Toyota"));

    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.stop_reason.as_deref(), Some("circuit_breaker"));
    assert_eq!(run.records_saved, 5);
}

#[tokio::test]
async fn test_stub_page_is_retried_until_valid() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    mount_listing(&server, 1, &[501]).await;
    Mock::given(method("GET"))
        .and(path("/en/ad/test-car-ID501.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STUB_PAGE))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_detail(&server, 501).await;

    let config = test_config(&base_url, &db_path, "full", "max-pages = 1");
    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::PageLimit);
    assert_eq!(report.totals.retries, 1);
    assert_eq!(report.totals.records_saved, 1);
    assert_eq!(report.totals.details_abandoned, 0);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let listing = storage.get_listing("501").unwrap().unwrap();
    assert_eq!(listing.title.as_deref(), Some("Test Car 501"));
}

#[tokio::test]
async fn test_unauthorized_detail_is_retried() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    mount_listing(&server, 1, &[601]).await;
    Mock::given(method("GET"))
        .and(path("/en/ad/test-car-ID601.html"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_detail(&server, 601).await;

    let config = test_config(&base_url, &db_path, "full", "max-pages = 1");
    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.totals.retries, 1);
    assert_eq!(report.totals.records_saved, 1);
}

#[tokio::test]
async fn test_detail_abandoned_after_max_attempts() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    mount_listing(&server, 1, &[701]).await;
    Mock::given(method("GET"))
        .and(path("/en/ad/test-car-ID701.html"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(&base_url, &db_path, "full", "max-pages = 1");
    config.retry.max_attempts = 2;
    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::PageLimit);
    assert_eq!(report.totals.details_abandoned, 1);
    assert_eq!(report.totals.records_saved, 0);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_listings(None).unwrap(), 0);
}

#[tokio::test]
async fn test_missing_listing_page_exhausts_listing() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    mount_listing(&server, 1, &[801, 802]).await;
    mount_detail(&server, 801).await;
    // 802's detail page is gone
    Mock::given(method("GET"))
        .and(path("/en/ad/test-car-ID802.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = test_config(&base_url, &db_path, "full", "");
    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::ListingExhausted);
    assert_eq!(report.last_page, 2);
    assert_eq!(report.totals.records_saved, 1);
    assert_eq!(report.totals.records_dropped, 1);
}

#[tokio::test]
async fn test_cancelled_session_is_recorded_as_interrupted() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_page(&[901]))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = test_config(&base_url, &db_path, "full", "");
    let coordinator = Coordinator::new(config, "test-hash".to_string()).unwrap();
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_session_without_progress_stalls() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = test_config(&base_url, &db_path, "full", "");
    config.crawler.request_timeout_secs = 1;
    config.crawler.stall_timeout_secs = 2;
    config.retry.max_attempts = 0;
    validate(&config).unwrap();

    let started = std::time::Instant::now();
    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Stalled);
    assert!(report.is_error());
    assert!(report.totals.retries > 0);
    assert_eq!(report.totals.pages_fetched, 0);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    let storage = SqliteStorage::new(&db_path).unwrap();
    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.stop_reason.as_deref(), Some("stalled"));
}

#[tokio::test]
async fn test_listing_recovers_after_server_error() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("listings.db");

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_listing(&server, 1, &[1001]).await;
    mount_detail(&server, 1001).await;

    let mut config = test_config(&base_url, &db_path, "full", "max-pages = 1");
    config.crawler.request_timeout_secs = 1;
    config.crawler.stall_timeout_secs = 2;
    config.retry.base_delay_ms = 200;
    config.retry.max_delay_ms = 400;
    validate(&config).unwrap();

    let report = Coordinator::new(config, "test-hash".to_string())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::PageLimit);
    assert_eq!(report.totals.retries, 1);
    assert_eq!(report.totals.records_saved, 1);
}
