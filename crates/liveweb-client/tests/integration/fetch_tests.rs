use std::time::Duration;

use liveweb_client::RemoteLiveWebCache;
use liveweb_core::testutil::{MockDecoder, html_resource};
use liveweb_core::{FetchOutcome, FetchRequest, LiveWebCache, LiveWebError, PoolConfig};

use crate::common::{MockLiveService, Reply, closed_port_url, gzip, truncated_body_url};

fn cache(config: PoolConfig) -> RemoteLiveWebCache {
    RemoteLiveWebCache::new(config).unwrap()
}

#[tokio::test]
async fn valid_record_returns_decoded_resource() {
    let service = MockLiveService::start(Reply::record(
        "http://example.com/",
        200,
        &[("Content-Type", "text/html"), ("X-Live", "yes")],
        "<html>live</html>",
    ))
    .await;
    let cache = cache(PoolConfig::default());

    let outcome = cache.fetch(&service.url("/page")).await.unwrap();
    let resource = outcome.into_resource().expect("expected a resource");

    assert_eq!(resource.status_code, 200);
    assert_eq!(resource.headers.get("content-type"), Some("text/html"));
    assert_eq!(resource.headers.get("x-live"), Some("yes"));
    assert_eq!(resource.body, b"<html>live</html>");
    assert_eq!(resource.record_url.as_deref(), Some("http://example.com/"));
    assert_eq!(service.hits(), 1);
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn inner_error_status_other_than_502_is_still_a_resource() {
    let service =
        MockLiveService::start(Reply::record("http://example.com/", 404, &[], "gone")).await;
    let cache = cache(PoolConfig::default());

    let resource = cache
        .fetch(&service.url("/missing"))
        .await
        .unwrap()
        .into_resource()
        .expect("expected a resource");
    assert_eq!(resource.status_code, 404);
    assert_eq!(resource.body, b"gone");
}

#[tokio::test]
async fn inner_502_is_document_not_available() {
    let service =
        MockLiveService::start(Reply::record("http://example.com/", 502, &[], "")).await;
    let cache = cache(PoolConfig::default());
    let url = service.url("/page");

    let outcome = cache.fetch(&url).await.unwrap();
    assert_eq!(outcome, FetchOutcome::DocumentNotAvailable(url));
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn outer_non_200_is_cache_unavailable() {
    for status in [302, 404, 500, 503] {
        let service = MockLiveService::start(Reply::Status(status)).await;
        let cache = cache(PoolConfig::default());
        let url = service.url("/page");

        let outcome = cache.fetch(&url).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::CacheUnavailable(url),
            "outer status {status}"
        );
        assert_eq!(cache.pool().in_use(&service.host_key()), 0);
    }
}

#[tokio::test]
async fn undecodable_payloads_are_document_not_available() {
    let payloads = [
        gzip(b"no record header here"),
        gzip(b"http://x/ 1.2.3.4 20240101000000 text/html 999\nHTTP/1.1 200 OK\r\n\r\n"),
    ];

    for payload in payloads {
        let service = MockLiveService::start(Reply::Body(payload)).await;
        let cache = cache(PoolConfig::default());
        let url = service.url("/page");

        let outcome = cache.fetch(&url).await.unwrap();
        assert_eq!(outcome, FetchOutcome::DocumentNotAvailable(url));
        assert_eq!(cache.pool().in_use(&service.host_key()), 0);
    }
}

#[tokio::test]
async fn malformed_url_never_reaches_the_network() {
    let service = MockLiveService::start(Reply::Status(200)).await;
    let cache = cache(PoolConfig::default());
    cache
        .set_proxy_host_port(&service.proxy_host_port())
        .unwrap();

    for url in ["not a url", "http//missing-colon", "ftp://example.com/file"] {
        let outcome = cache.fetch(url).await.unwrap();
        assert!(
            matches!(outcome, FetchOutcome::DocumentNotAvailable(_)),
            "{url}: {outcome:?}"
        );
    }
    assert_eq!(service.hits(), 0);
}

#[tokio::test]
async fn connection_refused_is_cache_unavailable_with_message_and_url() {
    let cache = cache(PoolConfig {
        connect_timeout_ms: 2_000,
        ..PoolConfig::default()
    });
    let url = closed_port_url();

    match cache.fetch(&url).await.unwrap() {
        FetchOutcome::CacheUnavailable(reason) => {
            assert!(reason.ends_with(&format!(" : {url}")), "{reason}");
            assert!(reason.len() > url.len() + 3, "missing failure message: {reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(cache.pool().total_in_use(), 0);
}

#[tokio::test]
async fn socket_timeout_is_cache_unavailable() {
    let service = MockLiveService::start_with_delay(
        Reply::record("http://example.com/", 200, &[], "late"),
        Duration::from_secs(2),
    )
    .await;
    let cache = cache(PoolConfig {
        socket_timeout_ms: 200,
        ..PoolConfig::default()
    });
    let url = service.url("/slow");

    match cache.fetch(&url).await.unwrap() {
        FetchOutcome::CacheUnavailable(reason) => {
            assert!(reason.ends_with(&format!(" : {url}")), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn pool_slot_timeout_is_cache_unavailable() {
    let service =
        MockLiveService::start(Reply::record("http://example.com/", 200, &[], "ok")).await;
    let cache = cache(PoolConfig {
        max_host_connections: 1,
        connect_timeout_ms: 50,
        ..PoolConfig::default()
    });
    let held = cache.pool().acquire(&service.host_key()).await.unwrap();

    let outcome = cache.fetch(&service.url("/page")).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::CacheUnavailable(_)));
    assert_eq!(service.hits(), 0);

    held.release();
    let outcome = cache.fetch(&service.url("/page")).await.unwrap();
    assert!(outcome.into_resource().is_some());
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn proxy_routes_requests_through_live_service() {
    let service =
        MockLiveService::start(Reply::record("http://live.example/page", 200, &[], "proxied"))
            .await;
    let cache = cache(PoolConfig::default());
    cache
        .set_proxy_host_port(&service.proxy_host_port())
        .unwrap();

    let resource = cache
        .get_cached_resource(&FetchRequest::new("http://live.example/page"))
        .await
        .unwrap()
        .into_resource()
        .expect("expected a resource");

    assert_eq!(resource.body, b"proxied");
    assert_eq!(service.hits(), 1);
    assert!(
        service.requests()[0].contains("/page"),
        "{:?}",
        service.requests()
    );
    assert_eq!(cache.pool().in_use("live.example:80"), 0);
}

#[tokio::test]
async fn concurrent_fetches_respect_per_host_cap() {
    let service = MockLiveService::start_with_delay(
        Reply::record("http://example.com/", 200, &[], "ok"),
        Duration::from_millis(100),
    )
    .await;
    let cache = cache(PoolConfig {
        max_total_connections: 10,
        max_host_connections: 2,
        connect_timeout_ms: 5_000,
        ..PoolConfig::default()
    });

    let urls: Vec<String> = (0..5).map(|i| service.url(&format!("/page/{i}"))).collect();
    let outcomes = futures::future::join_all(urls.iter().map(|url| cache.fetch(url))).await;

    for outcome in outcomes {
        assert!(outcome.unwrap().into_resource().is_some());
    }
    assert_eq!(service.hits(), 5);
    assert!(service.peak_concurrency() <= 2, "peak {}", service.peak_concurrency());
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
    assert_eq!(cache.pool().total_in_use(), 0);
}

#[tokio::test]
async fn settings_change_applies_to_later_fetches() {
    let service = MockLiveService::start_with_delay(
        Reply::record("http://example.com/", 200, &[], "ok"),
        Duration::from_millis(300),
    )
    .await;
    let cache = cache(PoolConfig::default());

    assert!(cache.fetch(&service.url("/a")).await.unwrap().into_resource().is_some());

    cache.set_socket_timeout_ms(50);
    assert_eq!(cache.socket_timeout_ms(), 50);
    let outcome = cache.fetch(&service.url("/b")).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::CacheUnavailable(_)));
}

#[tokio::test]
async fn decoder_receives_decompressed_record() {
    let service = MockLiveService::start(Reply::Body(gzip(b"raw record bytes"))).await;
    let decoder = MockDecoder::new(html_resource(200, "ok"));
    let cache = RemoteLiveWebCache::with_decoder(PoolConfig::default(), decoder.clone()).unwrap();
    let url = service.url("/page");

    let resource = cache.fetch(&url).await.unwrap().into_resource().unwrap();
    assert_eq!(resource.body, b"ok");

    let calls = decoder.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, url);
    assert_eq!(calls[0].1, b"raw record bytes");
}

#[tokio::test]
async fn corrupt_gzip_is_an_error_not_an_outcome() {
    let service = MockLiveService::start(Reply::Body(b"definitely not gzip".to_vec())).await;
    let cache = cache(PoolConfig::default());

    let err = cache.fetch(&service.url("/page")).await.unwrap_err();
    assert!(matches!(err, LiveWebError::Io(_)), "{err:?}");
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn oversized_payload_is_an_error() {
    let service =
        MockLiveService::start(Reply::record("http://example.com/", 200, &[], "big body"))
            .await;
    let cache = cache(PoolConfig::default()).with_max_record_bytes(16);

    let err = cache.fetch(&service.url("/page")).await.unwrap_err();
    assert!(err.to_string().contains("exceeds 16 bytes"), "{err}");
    assert_eq!(cache.pool().in_use(&service.host_key()), 0);
}

#[tokio::test]
async fn connection_closed_mid_body_is_unclassified_error() {
    let url = truncated_body_url().await;
    let cache = cache(PoolConfig {
        socket_timeout_ms: 5_000,
        ..PoolConfig::default()
    });

    let err = cache.fetch(&url).await.unwrap_err();
    assert!(matches!(err, LiveWebError::HttpError(_)), "{err:?}");
    assert!(err.to_string().ends_with(&format!(" : {url}")), "{err}");
    assert_eq!(cache.pool().total_in_use(), 0);
}

#[tokio::test]
async fn unresolvable_host_is_unclassified_error() {
    let cache = cache(PoolConfig::default());

    let result = cache.fetch("http://no-such-host.invalid/page").await;
    assert!(
        matches!(result, Err(LiveWebError::HttpError(_))),
        "{result:?}"
    );
    assert_eq!(cache.pool().in_use("no-such-host.invalid:80"), 0);
}
