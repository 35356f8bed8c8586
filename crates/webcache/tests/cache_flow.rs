use std::sync::Arc;

use bytes::Bytes;
use tempfile::{TempDir, tempdir};
use webcache_engine::protocol::{Gate, ScriptedFetcher, ScriptedResponse};
use webcache_engine::{
    CacheConfig, CacheKey, CacheManager, FreshnessMode, ItemState, ProtocolAccess, ResponseMeta,
};

const PAGE: &str = "http://example.com/page.html";
const PAST: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn config(dir: &TempDir, freshness: FreshnessMode) -> CacheConfig {
    CacheConfig::builder()
        .with_directory(dir.path().join("cache"))
        .with_max_size(1024 * 1024)
        .with_freshness(freshness)
        .build()
}

fn manager(dir: &TempDir, fetcher: &ScriptedFetcher, freshness: FreshnessMode) -> CacheManager {
    CacheManager::new(config(dir, freshness), Arc::new(fetcher.clone()))
}

async fn fetch(manager: &CacheManager, url: &str) -> (ResponseMeta, Bytes) {
    let mut api = manager.get(url).unwrap();
    api.read_to_end().await.unwrap()
}

async fn reload(manager: &CacheManager, url: &str) -> (ResponseMeta, Bytes) {
    let mut api = manager
        .open(url, webcache_engine::Method::Get, Default::default(), true, None)
        .unwrap();
    api.read_to_end().await.unwrap()
}

fn summary(manager: &CacheManager) -> Vec<(String, String, u64)> {
    manager
        .entries()
        .into_iter()
        .map(|e| (e.url, e.filename, e.size))
        .collect()
}

fn key(url: &str) -> CacheKey {
    CacheKey::normalize(url).unwrap()
}

#[tokio::test]
async fn concurrent_opens_share_one_fetch() {
    init_tracing();
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let gate = Gate::new();
    fetcher.respond(
        PAGE,
        ScriptedResponse::ok("text/html", "")
            .with_chunks(["<html>", "shared", "</html>"])
            .gated(gate.clone()),
    );
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    let mut first = manager.get(PAGE).unwrap();
    let mut second = manager.get("http://EXAMPLE.com:80/page.html#top").unwrap();
    assert_eq!(fetcher.fetch_count(PAGE), 1);
    assert!(first.shares_item_with(&second));
    assert_eq!(first.state(), ItemState::Fetching);
    assert!(manager.is_active(&key(PAGE)));

    gate.open();
    let (meta_a, body_a) = first.read_to_end().await.unwrap();
    let (meta_b, body_b) = second.read_to_end().await.unwrap();
    assert_eq!(meta_a.status, meta_b.status);
    assert_eq!(body_a, body_b);
    assert_eq!(&body_a[..], b"<html>shared</html>");

    drop(first);
    assert!(manager.is_active(&key(PAGE)));
    drop(second);
    assert!(!manager.is_active(&key(PAGE)));

    let entry = manager.lookup(&key(PAGE)).unwrap();
    assert_eq!(entry.size, body_a.len() as u64);
    assert_eq!(entry.content_type, "text/html");
}

#[tokio::test]
async fn cached_copy_is_served_without_fetching() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "cached body"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    fetch(&manager, PAGE).await;
    let (meta, body) = fetch(&manager, PAGE).await;
    assert_eq!(fetcher.fetch_count(PAGE), 1);
    assert_eq!(meta.status, 200);
    assert_eq!(meta.header("content-length"), Some("11"));
    assert_eq!(&body[..], b"cached body");
}

#[tokio::test]
async fn expired_entry_is_evicted_and_refetched() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(
        PAGE,
        ScriptedResponse::ok("text/html", "old").with_header("expires", PAST),
    );
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    fetch(&manager, PAGE).await;
    let stale = manager.lookup(&key(PAGE)).unwrap();
    let stale_path = dir.path().join("cache").join(&stale.filename);
    assert!(stale_path.exists());

    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "new"));
    let (_, body) = fetch(&manager, PAGE).await;
    assert_eq!(&body[..], b"new");
    assert_eq!(fetcher.fetch_count(PAGE), 2);
    assert!(!stale_path.exists());

    let fresh = manager.lookup(&key(PAGE)).unwrap();
    assert_ne!(fresh.filename, stale.filename);
    assert!(fresh.expires.is_none());
}

#[tokio::test]
async fn missing_payload_falls_back_to_live_fetch() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/plain", "payload"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    fetch(&manager, PAGE).await;
    let entry = manager.lookup(&key(PAGE)).unwrap();
    std::fs::remove_file(dir.path().join("cache").join(&entry.filename)).unwrap();

    let (_, body) = fetch(&manager, PAGE).await;
    assert_eq!(&body[..], b"payload");
    assert_eq!(fetcher.fetch_count(PAGE), 2);
    assert!(manager.lookup(&key(PAGE)).is_some());
}

#[tokio::test]
async fn not_modified_serves_cached_copy() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(
        PAGE,
        ScriptedResponse::ok("text/html", "original").with_header("last-modified", PAST),
    );
    let manager = manager(&dir, &fetcher, FreshnessMode::Always);

    fetch(&manager, PAGE).await;
    let before = manager.lookup(&key(PAGE)).unwrap();

    fetcher.respond(PAGE, ScriptedResponse::not_modified());
    let (meta, body) = fetch(&manager, PAGE).await;
    assert_eq!(meta.status, 200);
    assert_eq!(&body[..], b"original");

    let requests = fetcher.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].if_modified_since.is_none());
    assert_eq!(
        requests[1].if_modified_since.as_ref().map(|t| t.to_seconds()),
        Some(784_111_777)
    );

    let after = manager.lookup(&key(PAGE)).unwrap();
    assert_eq!(after.filename, before.filename);
}

#[tokio::test]
async fn revalidating_until_cached_copy_delivers() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(
        PAGE,
        ScriptedResponse::ok("text/html", "original").with_header("last-modified", PAST),
    );
    let manager = manager(&dir, &fetcher, FreshnessMode::Always);
    fetch(&manager, PAGE).await;

    fetcher.respond(PAGE, ScriptedResponse::not_modified());
    let mut api = manager.get(PAGE).unwrap();
    assert_eq!(api.state(), ItemState::Fetching);
    assert!(api.poll_meta().ready);
    assert_eq!(api.state(), ItemState::Revalidating);
    assert_eq!(api.get_meta().unwrap().status, 200);

    let (_, body) = api.read_to_end().await.unwrap();
    assert_eq!(&body[..], b"original");
    assert_eq!(api.state(), ItemState::Ready);
}

#[tokio::test]
async fn changed_document_replaces_cached_copy() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "version one"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Always);

    fetch(&manager, PAGE).await;
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "v2"));
    let (_, body) = fetch(&manager, PAGE).await;
    assert_eq!(&body[..], b"v2");

    let entry = manager.lookup(&key(PAGE)).unwrap();
    assert_eq!(entry.size, 2);
    assert_eq!(manager.stats().size, 2);
}

#[tokio::test]
async fn reload_always_fetches_and_replaces() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "first"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    fetch(&manager, PAGE).await;
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "second!"));
    let (_, body) = reload(&manager, PAGE).await;
    assert_eq!(&body[..], b"second!");

    let requests = fetcher.requests();
    assert!(requests[1].reload);
    assert_eq!(manager.lookup(&key(PAGE)).unwrap().size, 7);
    assert_eq!(manager.stats().entries, 1);
}

#[tokio::test]
async fn per_session_revalidates_after_first_query() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "doc"));
    {
        let seed = manager(&dir, &fetcher, FreshnessMode::Never);
        fetch(&seed, PAGE).await;
        seed.shutdown().unwrap();
    }
    assert_eq!(fetcher.fetch_count(PAGE), 1);

    let manager = manager(&dir, &fetcher, FreshnessMode::PerSession);
    fetcher.respond(PAGE, ScriptedResponse::not_modified());

    fetch(&manager, PAGE).await;
    assert_eq!(fetcher.fetch_count(PAGE), 1);

    let (_, body) = fetch(&manager, PAGE).await;
    assert_eq!(&body[..], b"doc");
    assert_eq!(fetcher.fetch_count(PAGE), 2);
}

#[tokio::test]
async fn uncacheable_responses_are_not_stored() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let query = "http://example.com/search?q=rust";
    let private = "http://example.com/private";
    fetcher.respond(query, ScriptedResponse::ok("text/html", "results"));
    fetcher.respond(
        private,
        ScriptedResponse::ok("text/html", "secret").with_header("cache-control", "no-store"),
    );
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    fetch(&manager, query).await;
    fetch(&manager, private).await;
    fetch(&manager, private).await;
    assert_eq!(manager.stats().entries, 0);
    assert_eq!(fetcher.fetch_count(private), 2);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    for (i, url) in ["http://a.test/", "http://b.test/", "http://c.test/"].iter().enumerate() {
        fetcher.respond(url, ScriptedResponse::ok("text/plain", format!("body {i}")));
    }

    let order = {
        let manager = manager(&dir, &fetcher, FreshnessMode::Never);
        for url in ["http://a.test/", "http://b.test/", "http://c.test/"] {
            fetch(&manager, url).await;
        }
        fetch(&manager, "http://a.test/").await;
        let order = summary(&manager);
        manager.shutdown().unwrap();
        order
    };

    let manager = manager(&dir, &fetcher, FreshnessMode::Never);
    let replayed = summary(&manager);
    assert_eq!(replayed, order);
    assert_eq!(replayed.last().unwrap().0, "http://a.test/");

    let (_, body) = fetch(&manager, "http://b.test/").await;
    assert_eq!(&body[..], b"body 1");
    assert_eq!(fetcher.fetch_count("http://b.test/"), 1);
}

#[tokio::test]
async fn storage_failure_still_delivers_the_body() {
    init_tracing();
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "unstored"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    // Payload files cannot be created once the store directory is a file.
    let store_dir = dir.path().join("cache");
    std::fs::remove_dir_all(&store_dir).unwrap();
    std::fs::write(&store_dir, b"").unwrap();

    let (meta, body) = fetch(&manager, PAGE).await;
    assert_eq!(meta.status, 200);
    assert_eq!(&body[..], b"unstored");
    assert!(manager.lookup(&key(PAGE)).is_none());
    assert_eq!(manager.stats().entries, 0);
    assert_eq!(manager.stats().size, 0);
    assert_eq!(std::fs::read(&store_dir).unwrap(), b"");
}

#[tokio::test]
async fn post_requests_bypass_the_cache() {
    let dir = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(PAGE, ScriptedResponse::ok("text/html", "posted"));
    let manager = manager(&dir, &fetcher, FreshnessMode::Never);

    for _ in 0..2 {
        let mut api = manager
            .open(
                PAGE,
                webcache_engine::Method::Post,
                Default::default(),
                false,
                Some(Bytes::from_static(b"field=1")),
            )
            .unwrap();
        let (_, body) = api.read_to_end().await.unwrap();
        assert_eq!(&body[..], b"posted");
    }
    assert_eq!(fetcher.fetch_count(PAGE), 2);
    assert!(manager.lookup(&key(PAGE)).is_none());
}
