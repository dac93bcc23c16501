//! A `conduit-server` instance with routes for client tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;

use conduit_server::{Routing, Server, ServerHandle, ServerRequest, ServerResponse};

/// What the server observed.
#[derive(Debug, Default)]
pub struct Observed {
    pub hits: AtomicUsize,
    pub overlap: AtomicBool,
    in_use: Mutex<HashSet<SocketAddr>>,
}

impl Observed {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

pub struct TestServer {
    pub handle: ServerHandle,
    pub observed: Arc<Observed>,
}

impl TestServer {
    pub fn base_uri(&self) -> String {
        self.handle.base_uri()
    }

    pub fn uri(&self, path: &str) -> String {
        format!("{}{path}", self.handle.base_uri())
    }

    pub async fn stop(self) {
        self.handle.shutdown().await.unwrap();
    }
}

fn routing(observed: &Arc<Observed>) -> Routing {
    let counter = Arc::clone(observed);
    let tracker = Arc::clone(observed);

    Routing::builder()
        .any("/*", move |req: ServerRequest| {
            counter.hits.fetch_add(1, Ordering::SeqCst);
            async move { Ok(conduit_server::HandlerOutcome::Next(req)) }
        })
        .get("/hello", |_req: ServerRequest| async move {
            Ok(ServerResponse::ok().header("content-type", "text/plain").body("hello"))
        })
        .post("/echo", |mut req: ServerRequest| async move {
            let content_type = req
                .header("content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = req.bytes().await?;
            Ok(ServerResponse::ok().header("content-type", content_type).body(body))
        })
        .get("/headers", |req: ServerRequest| async move {
            let headers: serde_json::Map<String, serde_json::Value> = req
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    Some((name.to_string(), value.to_str().ok()?.to_string().into()))
                })
                .collect();
            Ok(ServerResponse::ok().json(&headers))
        })
        .get("/ndjson", |req: ServerRequest| async move {
            let count: usize = req.query().get("n").and_then(|n| n.parse().ok()).unwrap_or(3);
            Ok(ServerResponse::ok()
                .header("content-type", "application/x-ndjson")
                .streaming(move |writer| async move {
                    for id in 0..count {
                        writer.write(format!("{{\"id\":{id}}}\n")).await?;
                    }
                    Ok(())
                }))
        })
        .get("/drip", |_req: ServerRequest| async move {
            Ok(ServerResponse::ok().streaming(|writer| async move {
                loop {
                    writer.write("tick\n").await?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }))
        })
        .get("/slow", |_req: ServerRequest| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(ServerResponse::ok().body("late"))
        })
        .get("/hold", move |req: ServerRequest| {
            let observed = Arc::clone(&tracker);
            async move {
                let remote = req.remote_addr();
                if let Some(addr) = remote {
                    if !observed.in_use.lock().insert(addr) {
                        observed.overlap.store(true, Ordering::SeqCst);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                if let Some(addr) = remote {
                    observed.in_use.lock().remove(&addr);
                }
                Ok(ServerResponse::ok().body("held"))
            }
        })
        .get("/status/{code}", |req: ServerRequest| async move {
            let code = req
                .param("code")
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::BAD_REQUEST);
            Ok(ServerResponse::new(code).body(code.to_string()))
        })
        .build()
}

pub async fn start() -> TestServer {
    let observed = Arc::new(Observed::default());
    let handle = Server::builder()
        .http_addr("127.0.0.1:0")
        .shutdown_timeout(Duration::from_secs(1))
        .routing(routing(&observed))
        .build()
        .start()
        .await
        .unwrap();
    TestServer { handle, observed }
}

/// Returns a local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
