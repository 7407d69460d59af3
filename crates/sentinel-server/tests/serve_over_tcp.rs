use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use sentinel_core::{AssistService, GenerationRequest, ServerLogStore, StructuredGenerator};
use sentinel_server::{serve_listener, AppState};
use sentinel_types::{LogLevel, LogOrigin, LogRecord};

struct Unavailable;

#[async_trait]
impl StructuredGenerator for Unavailable {
    async fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<Value> {
        anyhow::bail!("no provider reachable")
    }
}

#[tokio::test]
async fn logs_round_trip_over_a_real_socket() {
    let logs = ServerLogStore::new(200);
    logs.seed_startup_entries().await;
    let state = AppState::new(
        logs.clone(),
        AssistService::new(Arc::new(Unavailable), logs.clone()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_listener(listener, state, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let resp = client
        .post(format!("{base}/api/logs"))
        .json(&json!({"message": "from the test", "level": "warning"}))
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status().as_u16(), 201);

    let records: Vec<LogRecord> = client
        .get(format!("{base}/api/logs"))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("records");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.origin == LogOrigin::Remote));
    assert_eq!(records[2].level, LogLevel::Warning);

    let resp = client
        .post(format!("{base}/api/ideas/refine"))
        .json(&json!({"ideaText": "Add dark mode"}))
        .send()
        .await
        .expect("refine");
    assert_eq!(resp.status().as_u16(), 502);
    let errors = logs
        .list()
        .await
        .into_iter()
        .filter(|r| r.level == LogLevel::Error)
        .count();
    assert_eq!(errors, 1);

    let _ = stop_tx.send(());
    server.await.expect("join").expect("serve");
}
