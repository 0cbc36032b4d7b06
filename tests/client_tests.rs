mod common;

use common::{TestContext, TOKEN};
use git_auto_deploy::DeployError;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_get_json_sends_token_and_json_accept() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path("/meta"))
        .and(header("authorization", format!("token {}", TOKEN).as_str()))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let config = ctx.config();
    let client = ctx.client(&config);
    let value: Option<Value> = client
        .get_json(&format!("{}/meta", ctx.uri()))
        .await
        .unwrap();

    assert_eq!(value, Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_get_json_returns_none_for_non_json_body() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path("/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&ctx.server)
        .await;

    let config = ctx.config();
    let value: Option<Value> = ctx
        .client(&config)
        .get_json(&format!("{}/meta", ctx.uri()))
        .await
        .unwrap();

    assert!(value.is_none());
}

#[tokio::test]
async fn test_post_json_sends_body() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let config = ctx.config();
    let created: Option<Value> = ctx
        .client(&config)
        .post_json(&format!("{}/things", ctx.uri()), &json!({"name": "widget"}))
        .await
        .unwrap();

    assert_eq!(created, Some(json!({"id": 7})));
}

#[tokio::test]
async fn test_post_json_error_status() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Validation Failed"))
        .mount(&ctx.server)
        .await;

    let config = ctx.config();
    let err = ctx
        .client(&config)
        .post_json::<Value, _>(&format!("{}/things", ctx.uri()), &json!({}))
        .await
        .unwrap_err();

    match err {
        DeployError::Http { status, body, .. } => {
            assert_eq!(status, 422);
            assert_eq!(body, "Validation Failed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_get_file_streams_bytes() {
    let ctx = TestContext::new().await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    Mock::given(method("GET"))
        .and(path("/blob"))
        .and(header("accept", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&ctx.server)
        .await;

    let config = ctx.config();
    let bytes = ctx
        .client(&config)
        .get_file(&format!("{}/blob", ctx.uri()), "blob")
        .await
        .unwrap();

    assert_eq!(bytes, payload);
}

/// Serve a single response whose body is written one byte at a time with
/// `gap` before each byte. Returns the URL to request.
async fn trickle_server(body: Vec<u8>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        for byte in body {
            tokio::time::sleep(gap).await;
            if socket.write_all(&[byte]).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
    });

    format!("http://{}/asset", addr)
}

#[tokio::test]
async fn test_slow_download_outlasting_timeout_succeeds() {
    let ctx = TestContext::new().await;
    let body = b"twelve bytes".to_vec();
    let url = trickle_server(body.clone(), Duration::from_millis(250)).await;

    let mut config = ctx.config();
    config.timeout = Duration::from_secs(1);

    let started = Instant::now();
    let bytes = ctx.client(&config).get_file(&url, "asset").await.unwrap();

    assert_eq!(bytes, body);
    assert!(started.elapsed() > config.timeout);
}

#[tokio::test]
async fn test_stalled_download_fails() {
    let ctx = TestContext::new().await;
    let url = trickle_server(b"late".to_vec(), Duration::from_secs(5)).await;

    let mut config = ctx.config();
    config.timeout = Duration::from_secs(1);

    let err = ctx.client(&config).get_file(&url, "asset").await.unwrap_err();

    match err {
        DeployError::DownloadStalled { url: stalled, seconds } => {
            assert_eq!(stalled, url);
            assert_eq!(seconds, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}
