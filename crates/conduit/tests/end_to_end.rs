//! Client and server wired from one configuration file.

use std::time::Duration;

use conduit::prelude::*;
use http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Greeting {
    name: String,
    message: String,
}

const CONFIG: &str = r#"
[client]
max_idle_per_key = 2
read_timeout_ms = 5000

[client.default_headers]
x-caller = "end-to-end"

[server]
http_addr = "127.0.0.1:0"
request_timeout_ms = 2000
shutdown_timeout_secs = 1
"#;

fn routing() -> Routing {
    Routing::builder()
        .post("/greetings/{name}", |mut req: ServerRequest| async move {
            let caller = req.header("x-caller").unwrap_or("anonymous").to_string();
            let name = req.param("name").unwrap_or_default().to_string();
            let mut greeting: Greeting = req.json().await?;
            greeting.name = name;
            greeting.message = format!("{} (via {caller})", greeting.message);
            Ok(ServerResponse::new(StatusCode::CREATED).json(&greeting))
        })
        .build()
}

#[tokio::test]
async fn test_configured_client_talks_to_configured_server() {
    let config = ConfigLoader::new()
        .with_string(CONFIG, "toml")
        .unwrap()
        .load()
        .unwrap();

    let handle = ServerBuilder::from_settings(&config.server)
        .routing(routing())
        .build()
        .start()
        .await
        .unwrap();

    let client = WebClientBuilder::from_settings(&config.client)
        .base_uri(handle.base_uri())
        .service(TracingService::new())
        .service(MetricsService::new())
        .build()
        .unwrap();
    assert_eq!(client.config().read_timeout, Some(Duration::from_secs(5)));

    let mut response = client
        .post()
        .path("/greetings/ada")
        .json(&Greeting {
            name: String::new(),
            message: "hello".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let greeting: Greeting = response.json().await.unwrap();
    assert_eq!(
        greeting,
        Greeting {
            name: "ada".to_string(),
            message: "hello (via end-to-end)".to_string(),
        }
    );

    handle.shutdown().await.unwrap();
}
