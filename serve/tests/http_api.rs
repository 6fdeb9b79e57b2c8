//! End-to-end tests of the HTTP surface against an in-memory gate on 127.0.0.1:0.


use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hitl::{GateConfig, HitlService, InMemoryStore, PaperWorkflow, StaticSymbolResolver};
use reasoning_event::SseFrame;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Server {
    base: String,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn spawn_server() -> Server {
    let service = Arc::new(HitlService::new(
        GateConfig::default(),
        Arc::new(InMemoryStore::new()),
        Arc::new(PaperWorkflow::krx_demo()),
        Arc::new(StaticSymbolResolver::krx_defaults()),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(serve::run_serve_on_listener(listener, service, shutdown.clone()));
    Server {
        base,
        shutdown,
        client: reqwest::Client::new(),
    }
}

impl Server {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn gated_trade_round_trip() {
    let server = spawn_server().await;
    let res = server
        .post(
            "/turns",
            json!({ "conversation_id": "c1", "message": "삼성전자 1000만원 매수", "automation_level": 2 }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["requires_approval"], true);
    assert_eq!(body["approval_request"]["type"], "trade_execution");
    let token = body["resume_token"].as_str().unwrap().to_string();

    let pending = server
        .client
        .get(format!("{}/conversations/c1/approval", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(pending.status(), 200);
    let pending: Value = pending.json().await.unwrap();
    assert_eq!(pending["resume_token"], token.as_str());

    let done = server
        .post(&format!("/approvals/{token}"), json!({ "decision": "approved" }))
        .await;
    assert_eq!(done.status(), 200);
    let done: Value = done.json().await.unwrap();
    assert_eq!(done["metadata"]["outcome"], "executed");

    let again = server
        .post(&format!("/approvals/{token}"), json!({ "decision": "rejected" }))
        .await;
    assert_eq!(again.status(), 409);
    let again: Value = again.json().await.unwrap();
    assert_eq!(again["error"], "conflict_error");

    let none = server
        .client
        .get(format!("{}/conversations/c1/approval", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(none.status(), 204);
}

#[tokio::test]
async fn error_statuses_follow_taxonomy() {
    let server = spawn_server().await;

    let empty = server.post("/turns", json!({ "message": " " })).await;
    assert_eq!(empty.status(), 422);

    let unknown = server
        .post("/approvals/c9.0.deadbeef", json!({ "decision": "approved" }))
        .await;
    assert_eq!(unknown.status(), 404);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["error"], "not_found_error");

    let bad_decision = server
        .post("/approvals/c9.0.deadbeef", json!({ "decision": "maybe" }))
        .await;
    assert_eq!(bad_decision.status(), 422);

    let unrecognized = server
        .post("/turns", json!({ "conversation_id": "c2", "message": "오늘 날씨 어때" }))
        .await;
    assert_eq!(unrecognized.status(), 400);
}

#[tokio::test]
async fn automation_level_endpoint_validates_code() {
    let server = spawn_server().await;
    let url = format!("{}/conversations/c1/automation-level", server.base);

    let bad = server
        .client
        .put(&url)
        .json(&json!({ "automation_level": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let ok = server
        .client
        .put(&url)
        .json(&json!({ "automation_level": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let session: Value = ok.json().await.unwrap();
    assert_eq!(session["conversation_id"], "c1");
}

#[tokio::test]
async fn cancel_endpoint_is_idempotent() {
    let server = spawn_server().await;
    server
        .post(
            "/turns",
            json!({ "conversation_id": "c1", "message": "카카오 100만원 매수" }),
        )
        .await;
    let url = format!("{}/conversations/c1/approval", server.base);
    let first = server.client.delete(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["metadata"]["outcome"], "cancelled");
    let second = server.client.delete(&url).send().await.unwrap();
    assert_eq!(second.status(), 204);
}

#[tokio::test]
async fn reasoning_stream_replays_as_sse_frames() {
    let server = spawn_server().await;
    server
        .post("/turns", json!({ "conversation_id": "c1", "message": "카카오 현재가" }))
        .await;

    let history: Vec<Value> = server
        .client
        .get(format!("{}/conversations/c1/reasoning/history", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!history.is_empty());

    let res = server
        .client
        .get(format!("{}/conversations/c1/reasoning?after=0", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/event-stream");

    let mut body = res.bytes_stream();
    let mut buf = String::new();
    let mut frames: Vec<SseFrame> = Vec::new();
    while frames.len() < history.len() - 1 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("stream stalled")
            .expect("stream ended")
            .unwrap();
        buf.push_str(std::str::from_utf8(&chunk).unwrap());
        let (parsed, rest) = SseFrame::split_buffer(&buf);
        frames.extend(parsed);
        buf = rest;
    }
    assert_eq!(frames[0].id.as_deref(), Some("1"));
    let last = frames.last().unwrap();
    assert_eq!(last.event.as_deref(), Some("response.completed"));
    let event: Value = serde_json::from_str(&last.data).unwrap();
    assert_eq!(event["conversation_id"], "c1");
}
