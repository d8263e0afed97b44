//! Black-box integration tests for the `ragctl` binary: CLI ingestion
//! and search, plus the HTTP gateway's chat/search/tools/admin routes.
//!
//! The LLM and embedding backends are never real network services in
//! these tests — each test that needs one starts a `wiremock` server and
//! points the child process at it via `LLM_BASE_URL` / `EMBEDDING_BASE_URL`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path as path_matcher};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn ragctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // deps/
    path.pop();
    path.push("ragctl");
    path
}

fn find_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Lay out a corpus of two short Markdown documents with distinct
/// sections "A" and "B", plus a matching `ragctl.toml`.
fn setup_test_env(port: u16) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    std::fs::create_dir_all(&files_dir).unwrap();
    std::fs::write(
        files_dir.join("alpha.md"),
        "## A\n\nThis document is about Rust programming and cargo crates.\n",
    )
    .unwrap();
    std::fs::write(
        files_dir.join("beta.md"),
        "## B\n\nThis document discusses Python machine learning frameworks.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[corpus]
root = "{root}/files"

[db]
path = "{root}/data/ragctl.sqlite"

[server]
bind = "127.0.0.1:{port}"
"#,
        root = root.display(),
    );

    let config_path = root.join("ragctl.toml");
    std::fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragctl(config_path: &Path, args: &[&str], envs: &[(&str, &str)]) -> (String, String, bool) {
    let binary = ragctl_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config").arg(config_path.to_str().unwrap()).args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("failed to run ragctl binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// Deterministic fake embeddings: every input string hashes to an
/// 8-dimensional vector, so identical text always embeds identically.
struct EmbeddingResponder;

impl Respond for EmbeddingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        #[derive(serde::Deserialize)]
        struct EmbedRequest {
            input: Vec<String>,
        }
        let body: EmbedRequest = serde_json::from_slice(&request.body).unwrap_or(EmbedRequest { input: vec![] });
        let data: Vec<Value> = body
            .input
            .iter()
            .map(|text| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                let seed = hasher.finish();
                let vector: Vec<f32> = (0..8).map(|i| ((seed >> (i * 7)) & 0xFF) as f32 / 255.0).collect();
                json!({ "embedding": vector })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
    }
}

async fn mock_embedding_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_matcher("/v1/embeddings"))
        .respond_with(EmbeddingResponder)
        .mount(&server)
        .await;
    server
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for d in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": d } }] })
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Mounts a chat-completions mock that answers non-streaming requests
/// (`"stream":false`, used for intent classification and HyDE) with
/// `json_reply`, and streaming requests (`"stream":true`, the final
/// chat turn) with a fixed SSE body.
async fn mock_llm_server(json_reply: &str, stream_deltas: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_matcher("/v1/chat/completions"))
        .and(wiremock::matchers::body_string_contains("\"stream\":false"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": json_reply } }]
            })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_matcher("/v1/chat/completions"))
        .and(wiremock::matchers::body_string_contains("\"stream\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(stream_deltas), "text/event-stream"))
        .mount(&server)
        .await;
    server
}

async fn chat_completions_call_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/v1/chat/completions")
        .count()
}

fn start_http_server(config_path: &Path, embedding_uri: &str, llm_uri: &str) -> Child {
    Command::new(ragctl_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["serve", "http"])
        .env("EMBEDDING_BASE_URL", embedding_uri)
        .env("LLM_BASE_URL", llm_uri)
        .env("EMBEDDING_DIMS", "8")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("failed to start ragctl server: {}", e))
}

async fn wait_for_health(port: u16) {
    let url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server at port {port} did not become healthy in time");
}

// ============ CLI: init / ingest / search ============

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    let (stdout, stderr, success) = run_ragctl(&config_path, &["init"], &[]);
    assert!(success, "init failed: stdout={stdout} stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    assert!(run_ragctl(&config_path, &["init"], &[]).2);
    assert!(run_ragctl(&config_path, &["init"], &[]).2);
}

#[tokio::test]
async fn ingest_two_files_without_graph() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["ingest", "--skip-graph"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );
    assert!(success, "ingest failed: stdout={stdout} stderr={stderr}");

    let summary: Value = serde_json::from_str(stdout.trim()).expect("ingest prints a JSON summary");
    assert_eq!(summary["files_discovered"], 2);
    assert_eq!(summary["files_parsed"], 2);
    assert_eq!(summary["files_failed"], 0);
    assert_eq!(summary["chunks_written"], 2);
    assert_eq!(summary["graph_nodes"], 0);
}

#[tokio::test]
async fn ingest_with_graph_extraction() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let extraction = json!({
        "entities": [{"name": "Rust", "type": "Concept", "description": "a language"}],
        "relationships": []
    })
    .to_string();
    let llm = mock_llm_server(&extraction, &[]).await;

    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["ingest"],
        &[
            ("EMBEDDING_BASE_URL", &embedding.uri()),
            ("LLM_BASE_URL", &llm.uri()),
        ],
    );
    assert!(success, "ingest failed: stdout={stdout} stderr={stderr}");

    let summary: Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["chunks_written"], 2);
    // one Document node per file plus one extracted entity per file
    assert!(summary["graph_nodes"].as_u64().unwrap() >= 2);
    assert!(summary["graph_edges"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn cli_search_hybrid_mode_respects_limit() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    run_ragctl(&config_path, &["init"], &[]);
    let embedding = mock_embedding_server().await;
    run_ragctl(
        &config_path,
        &["ingest", "--skip-graph"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );

    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["search", "rust programming", "--mode", "hybrid", "--limit", "2"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );
    assert!(success, "search failed: stdout={stdout} stderr={stderr}");

    let results: Value = serde_json::from_str(stdout.trim()).unwrap();
    let results = results.as_array().unwrap();
    assert!(results.len() <= 2);
    assert!(!results.is_empty(), "expected at least one hit for a corpus term");
}

#[test]
fn cli_search_unknown_mode_errors() {
    let (_tmp, config_path) = setup_test_env(find_free_port());
    run_ragctl(&config_path, &["init"], &[]);
    let (_, _, success) = run_ragctl(&config_path, &["search", "test", "--mode", "bogus"], &[]);
    assert!(!success, "unknown search mode should fail");
}

// ============ HTTP gateway ============

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let llm = mock_llm_server("{}", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_search_rejects_empty_query() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let llm = mock_llm_server("{}", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/api/search"))
        .json(&json!({ "query": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["details"][0].as_str().unwrap().contains("query must not be empty"));

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_search_hyde_makes_exactly_one_more_llm_call_than_standard() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    run_ragctl(
        &config_path,
        &["ingest", "--skip-graph"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );

    let llm = mock_llm_server("a hypothetical answer passage", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/search");

    let before = chat_completions_call_count(&llm).await;
    let resp = client
        .post(&url)
        .json(&json!({ "query": "rust", "mode": "semantic", "method": "standard" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let after_standard = chat_completions_call_count(&llm).await;
    assert_eq!(after_standard - before, 0, "standard search should not call the LLM");

    let resp = client
        .post(&url)
        .json(&json!({ "query": "rust", "mode": "semantic", "method": "hyde" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["method"], "hyde");
    assert_eq!(body["mode"], "semantic");
    let after_hyde = chat_completions_call_count(&llm).await;
    assert_eq!(after_hyde - after_standard, 1, "HyDE should make exactly one extra LLM call");

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_search_hybrid_rewrites_query_once_and_caches_it() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    run_ragctl(
        &config_path,
        &["ingest", "--skip-graph"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );

    let llm = mock_llm_server("rust programming language and cargo crates", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/search");

    let before = chat_completions_call_count(&llm).await;
    let resp = client
        .post(&url)
        .json(&json!({ "query": "rust", "mode": "hybrid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let after_first = chat_completions_call_count(&llm).await;
    assert_eq!(after_first - before, 1, "hybrid mode should rewrite the query via the LLM");

    // Same query again: the rewrite should come from cache, not a second LLM call.
    let resp = client
        .post(&url)
        .json(&json!({ "query": "rust", "mode": "hybrid" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let after_second = chat_completions_call_count(&llm).await;
    assert_eq!(after_second, after_first, "repeated query should reuse the cached rewrite");

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_tools_execute_reports_missing_required_parameter() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let llm = mock_llm_server("{}", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/api/tools/execute"))
        .json(&json!({ "tool": "search_knowledge", "parameters": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["details"][0]
        .as_str()
        .unwrap()
        .contains("Missing required parameter: query"));

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_admin_rebuild_then_stats_are_all_zero() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    run_ragctl(
        &config_path,
        &["ingest", "--skip-graph"],
        &[("EMBEDDING_BASE_URL", &embedding.uri())],
    );

    let llm = mock_llm_server("{}", &["hi"]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let client = reqwest::Client::new();

    let stats_before: Value = client
        .get(format!("http://127.0.0.1:{port}/api/admin/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats_before["vectorDatabase"]["total_chunks"].as_u64().unwrap() >= 2);

    let rebuild: Value = client
        .post(format!("http://127.0.0.1:{port}/api/admin/rebuild"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rebuild["success"], true);

    let stats_after: Value = client
        .get(format!("http://127.0.0.1:{port}/api/admin/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats_after["vectorDatabase"]["total_chunks"], 0);
    assert_eq!(stats_after["knowledgeGraph"]["total_nodes"], 0);
    assert_eq!(stats_after["knowledgeGraph"]["total_edges"], 0);
    assert_eq!(stats_after["cache"]["totalKeys"], 0);

    server.kill().ok();
    server.wait().ok();
}

#[tokio::test]
async fn api_chat_concurrent_identical_requests_are_byte_identical() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env(port);
    run_ragctl(&config_path, &["init"], &[]);

    let embedding = mock_embedding_server().await;
    let intent = json!({
        "intent": "conversational",
        "needsSearch": false,
        "searchMode": "hybrid",
        "suggestedTools": [],
        "confidence": 0.9
    })
    .to_string();
    let llm = mock_llm_server(&intent, &["The answer", " is forty-two."]).await;
    let mut server = start_http_server(&config_path, &embedding.uri(), &llm.uri());
    wait_for_health(port).await;

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/chat");
    let request = || {
        client
            .post(&url)
            .json(&json!({ "message": "what is the answer?", "history": [] }))
            .send()
    };

    let (first, second) = tokio::join!(request(), request());
    let first_text = first.unwrap().text().await.unwrap();
    let second_text = second.unwrap().text().await.unwrap();
    assert_eq!(first_text, second_text);
    assert!(first_text.contains("forty-two"));

    server.kill().ok();
    server.wait().ok();
}
