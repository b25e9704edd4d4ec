//! Captioning against a local stand-in for an OpenAI-compatible endpoint.
//!
//! Run with:
//!   cargo test --test captioning

#![cfg(feature = "server")]

mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use common::{docx, png, upload};
use edgequake_doc2md::{convert_batch, ConversionConfig, FileStatus, IssueKind};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What the stub saw and what it answers with.
struct Stub {
    status: StatusCode,
    reply: Value,
    seen: Mutex<Vec<(Option<String>, Value)>>,
}

async fn chat(
    State(stub): State<Arc<Stub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    stub.seen.lock().await.push((auth, body));
    (stub.status, Json(stub.reply.clone()))
}

/// Serve the stub on an ephemeral port; returns its `/v1` base URL.
async fn spawn_stub(status: StatusCode, reply: Value) -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub {
        status,
        reply,
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .with_state(Arc::clone(&stub));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), stub)
}

fn completion(text: &str) -> Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 3 }
    })
}

fn keyed_config(base_url: &str) -> ConversionConfig {
    ConversionConfig::builder()
        .caption_from_env(false)
        .api_key("sk-session")
        .api_base_url(base_url)
        .model("gpt-4o-mini")
        .build()
        .unwrap()
}

#[tokio::test]
async fn captions_replace_alt_text_in_documents() {
    let (base, stub) = spawn_stub(StatusCode::OK, completion("A bar chart of sales")).await;

    let report = convert_batch(vec![upload("report.docx", docx())], &keyed_config(&base))
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status, FileStatus::Succeeded);
    assert!(
        r.markdown.contains("![A bar chart of sales](image1.png)"),
        "{}",
        r.markdown
    );
    assert_eq!(r.images_captioned, 1);
    assert_eq!(report.stats.images_captioned, 1);

    let seen = stub.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-session"));
    assert_eq!(seen[0].1["model"], "gpt-4o-mini");
    let content = &seen[0].1["messages"][1]["content"];
    assert!(content[1]["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn standalone_images_get_a_description_section() {
    let (base, _stub) = spawn_stub(StatusCode::OK, completion("A tiny black square.")).await;

    let report = convert_batch(vec![upload("dot.png", png())], &keyed_config(&base))
        .await
        .unwrap();

    let md = &report.results[0].markdown;
    assert!(md.starts_with("ImageSize: 2x2\n"), "{md}");
    assert!(md.contains("# Description:\nA tiny black square.\n"), "{md}");
}

#[tokio::test]
async fn rejected_key_degrades_to_alt_text_with_a_warning() {
    let (base, stub) = spawn_stub(
        StatusCode::UNAUTHORIZED,
        json!({ "error": { "message": "Incorrect API key provided" } }),
    )
    .await;

    let files = vec![upload("report.docx", docx()), upload("dot.png", png())];
    let report = convert_batch(files, &keyed_config(&base)).await.unwrap();

    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.caption_failures, 2);

    let doc = &report.results[0];
    assert!(doc.markdown.contains("![A chart](image1.png)"), "{}", doc.markdown);
    assert_eq!(doc.warnings.len(), 1);
    assert_eq!(doc.warnings[0].kind, IssueKind::CaptioningFailure);
    assert!(doc.warnings[0].message.contains("Incorrect API key"));

    let img = &report.results[1];
    assert!(img
        .markdown
        .contains("*No description available for this image.*"));

    // No retries: one call per image.
    assert_eq!(stub.seen.lock().await.len(), 2);
}

#[tokio::test]
async fn empty_model_answer_is_a_caption_failure() {
    let (base, _stub) = spawn_stub(StatusCode::OK, completion("   ")).await;

    let report = convert_batch(vec![upload("report.docx", docx())], &keyed_config(&base))
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status, FileStatus::Succeeded);
    assert!(r.markdown.contains("![A chart](image1.png)"));
    assert_eq!(r.images_captioned, 0);
    assert_eq!(r.warnings.len(), 1);
}
