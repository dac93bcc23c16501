//! Server behavior over a raw socket.

use std::net::SocketAddr;
use std::time::Duration;

use conduit_server::{Routing, Server, ServerHandle, ServerRequest, ServerResponse};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start(routing: Routing) -> ServerHandle {
    Server::builder()
        .http_addr("127.0.0.1:0")
        .request_timeout(Duration::from_millis(200))
        .routing(routing)
        .build()
        .start()
        .await
        .unwrap()
}

/// Sends one request with `Connection: close` and returns the raw response.
async fn exchange(addr: SocketAddr, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn status_of(raw: &str) -> u16 {
    raw.split(' ').nth(1).unwrap().parse().unwrap()
}

fn routing() -> Routing {
    Routing::builder()
        .post("/orders", |mut req: ServerRequest| async move {
            let order: serde_json::Value = req.json().await?;
            Ok(ServerResponse::new(StatusCode::CREATED).json(&order))
        })
        .get("/slow", |_req: ServerRequest| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ServerResponse::ok())
        })
        .get("/stream", |_req: ServerRequest| async move {
            Ok(ServerResponse::ok().streaming(|writer| async move {
                for i in 0..3 {
                    writer.write(format!("part-{i};")).await?;
                }
                Ok(())
            }))
        })
        .build()
}

#[tokio::test]
async fn test_structured_round_trip() {
    let handle = start(routing()).await;
    let raw = exchange(handle.local_addr(), "POST", "/orders", r#"{"sku":"A-1"}"#).await;

    assert_eq!(status_of(&raw), 201);
    assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(raw.ends_with(r#"{"sku":"A-1"}"#));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_entity_is_400() {
    let handle = start(routing()).await;
    let raw = exchange(handle.local_addr(), "POST", "/orders", "{not json").await;

    assert_eq!(status_of(&raw), 400);
    assert!(raw.contains("ENTITY_CONVERSION"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_is_404_json() {
    let handle = start(routing()).await;
    let raw = exchange(handle.local_addr(), "GET", "/missing", "").await;

    assert_eq!(status_of(&raw), 404);
    assert!(raw.contains(r#""code":"NOT_FOUND""#));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_timeout_is_504() {
    let handle = start(routing()).await;
    let raw = exchange(handle.local_addr(), "GET", "/slow", "").await;

    assert_eq!(status_of(&raw), 504);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_streaming_response_is_chunked() {
    let handle = start(routing()).await;
    let raw = exchange(handle.local_addr(), "GET", "/stream", "").await;

    assert_eq!(status_of(&raw), 200);
    assert!(raw.to_ascii_lowercase().contains("transfer-encoding: chunked"));
    for i in 0..3 {
        assert!(raw.contains(&format!("part-{i};")));
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_exchange() {
    let routing = Routing::builder()
        .get("/work", |_req: ServerRequest| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ServerResponse::ok().body("done"))
        })
        .build();
    let handle = start(routing).await;
    let addr = handle.local_addr();

    let in_flight = tokio::spawn(async move { exchange(addr, "GET", "/work", "").await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.active_connections(), 1);

    handle.shutdown().await.unwrap();
    let raw = in_flight.await.unwrap();
    assert_eq!(status_of(&raw), 200);
    assert!(raw.ends_with("done"));

    assert!(TcpStream::connect(addr).await.is_err());
}
