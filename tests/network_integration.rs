//! Integration tests for the network recovery layer.
//!
//! These tests drive `NetworkRecoveryManager` against wiremock servers.

use std::sync::Arc;
use std::time::Duration;

use harvester_core::config::RecoveryConfig;
use harvester_core::network::{
    FetchOptions, NetworkError, NetworkErrorKind, NetworkRecoveryManager, RetryPolicy,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
    )
}

fn manager() -> NetworkRecoveryManager {
    let config = RecoveryConfig {
        retry: fast_policy(3),
        attempt_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(500),
        ..RecoveryConfig::default()
    };
    NetworkRecoveryManager::new(config).expect("client builds")
}

#[tokio::test]
async fn test_fetch_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let recovery = manager();
    let url = format!("{}/feed", server.uri());
    let response = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(3))
        .await
        .expect("third attempt succeeds");

    assert_eq!(response.text().await.unwrap(), "ok");
    assert!(
        recovery.error_history(&url).is_empty(),
        "history is cleared once the resource recovers"
    );
    assert_eq!(recovery.in_flight_count(), 0);
}

#[tokio::test]
async fn test_fetch_gives_up_after_budget_with_last_kind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let recovery = manager();
    let url = format!("{}/down", server.uri());
    let err = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(2))
        .await
        .unwrap_err();

    match err {
        NetworkError::Failed {
            kind,
            status,
            attempts,
            ..
        } => {
            assert_eq!(kind, NetworkErrorKind::ServerError);
            assert_eq!(status, Some(500));
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected Failed, got: {other:?}"),
    }

    let history = recovery.error_history(&url);
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.kind == NetworkErrorKind::ServerError));
    assert_eq!(history.last().unwrap().retry, 2);
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let recovery = manager();
    let url = format!("{}/blocked", server.uri());
    let err = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(3))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(NetworkErrorKind::CorsLike));
}

#[tokio::test]
async fn test_identical_concurrent_fetch_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("done")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let recovery = Arc::new(manager());
    let url = format!("{}/slow", server.uri());

    let first = {
        let recovery = Arc::clone(&recovery);
        let url = url.clone();
        tokio::spawn(async move {
            recovery
                .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(0))
                .await
                .map(|r| r.status().as_u16())
        })
    };
    // Let the first request register its key.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(0))
        .await;
    assert!(matches!(second, Err(NetworkError::AlreadyInProgress { .. })));

    // A different method is a different request.
    let head = recovery
        .fetch_with_retry(&url, &FetchOptions::head(), &fast_policy(0))
        .await;
    assert!(head.is_ok());

    assert_eq!(first.await.unwrap().unwrap(), 200);
    assert_eq!(recovery.in_flight_count(), 0);
}

#[tokio::test]
async fn test_post_json_sends_body_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({ "url": "https://site.test/" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let recovery = manager();
    let body = serde_json::json!({ "url": "https://site.test/" }).to_string();
    let response = recovery
        .fetch_with_retry(
            &format!("{}/crawl", server.uri()),
            &FetchOptions::post_json(body),
            &fast_policy(0),
        )
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "[]");
}

#[tokio::test]
async fn test_find_best_locator_returns_responsive_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/mirror"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let recovery = manager();
    let candidates = vec![
        format!("{}/missing", server.uri()),
        format!("{}/mirror", server.uri()),
    ];
    let best = recovery.find_best_locator(&candidates).await;
    assert_eq!(best, Some(format!("{}/mirror", server.uri())));

    let none = recovery
        .find_best_locator(&[format!("{}/missing", server.uri())])
        .await;
    assert_eq!(none, None);
    assert_eq!(recovery.find_best_locator(&[]).await, None);
}

#[tokio::test]
async fn test_alternative_locators_use_relay_templates() {
    let recovery = manager();
    let alternatives = recovery.get_alternative_locators("https://cdn.example.com/a b.mp4");
    assert_eq!(alternatives.len(), 3);
    assert!(
        alternatives
            .iter()
            .all(|a| a.contains("https%3A%2F%2Fcdn.example.com"))
    );
}

#[tokio::test]
async fn test_cancelled_fetch_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let recovery = manager();
    let cancel = CancellationToken::new();
    let slow = RetryPolicy::new(5, Duration::from_secs(5), Duration::from_secs(5), 1.0);
    let url = format!("{}/flaky", server.uri());

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };
    let err = recovery
        .fetch_with_retry_cancellable(&url, &FetchOptions::get(), &slow, &cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, NetworkError::Cancelled { .. }));
    assert_eq!(recovery.in_flight_count(), 0);
}

/// Server that sends headers and the first bytes of a body, then stalls.
async fn stalled_body_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 100000\r\n\r\n<html>",
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    format!("http://{addr}/page")
}

#[tokio::test]
async fn test_read_text_times_out_on_stalled_body() {
    let url = stalled_body_server().await;
    let recovery = NetworkRecoveryManager::new(RecoveryConfig {
        retry: RetryPolicy::no_retry(),
        attempt_timeout: Duration::from_millis(300),
        ..RecoveryConfig::default()
    })
    .unwrap();

    let response = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &RetryPolicy::no_retry())
        .await
        .expect("headers arrive");
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        recovery.read_text(&url, response, 1024, &CancellationToken::new()),
    )
    .await
    .expect("read gives up on its own")
    .unwrap_err();

    assert_eq!(err.kind(), Some(NetworkErrorKind::Timeout));
}

#[tokio::test]
async fn test_read_text_caps_body_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10_000)))
        .mount(&server)
        .await;

    let recovery = manager();
    let url = format!("{}/big", server.uri());
    let response = recovery
        .fetch_with_retry(&url, &FetchOptions::get(), &fast_policy(0))
        .await
        .unwrap();
    let text = recovery
        .read_text(&url, response, 100, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(text.len(), 100);
}
