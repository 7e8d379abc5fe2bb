//! Listener binding and serving over a real socket

mod support;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use apostille::auth::RootResolver;
use apostille::http_server::{self, HttpServerError};

use support::TestServer;

#[tokio::test]
async fn test_bind_rejects_bad_address() {
    let err = http_server::bind("not-an-address").await.unwrap_err();
    assert!(matches!(err, HttpServerError::Bind { ref addr, .. } if addr == "not-an-address"));
}

#[tokio::test]
async fn test_bind_rejects_port_in_use() {
    let listener = http_server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let err = http_server::bind(&addr).await.unwrap_err();
    assert!(matches!(err, HttpServerError::Bind { .. }));
}

#[tokio::test]
async fn test_serve_until_shutdown() {
    let server = TestServer::new(RootResolver::new(Vec::new()));
    let listener = http_server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let handle = tokio::spawn(http_server::serve(listener, server.router.clone(), shutdown_rx));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /_status/livez HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
