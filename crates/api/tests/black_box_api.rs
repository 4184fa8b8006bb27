use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use spendlens_ai::{CapabilitySet, fixtures::Script};
use spendlens_api::app::{self, services::AppServices};
use spendlens_core::Capability;
use spendlens_infra::GatewayConfig;

struct TestServer {
    base_url: String,
    ws_url: String,
    handle: tokio::task::JoinHandle<()>,
    artifacts: tempfile::TempDir,
}

impl TestServer {
    async fn spawn(capabilities: CapabilitySet) -> Self {
        Self::spawn_with(capabilities, |_| {}).await
    }

    async fn spawn_with(capabilities: CapabilitySet, tweak: impl FnOnce(&mut GatewayConfig)) -> Self {
        let artifacts = tempfile::tempdir().expect("tempdir");
        let mut config = GatewayConfig {
            artifact_dir: artifacts.path().to_path_buf(),
            dispatch_timeout: Duration::from_secs(2),
            ..GatewayConfig::default()
        };
        tweak(&mut config);

        // Same router as prod, bound to an ephemeral port.
        let services = AppServices::with_capabilities(capabilities, config)
            .await
            .expect("services");
        let app = app::build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws/real-time-analysis"),
            handle,
            artifacts,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn artifact_dir(&self) -> &Path {
        self.artifacts.path()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn expense(id: &str) -> Value {
    json!({
        "id": id,
        "description": "Team lunch",
        "amount": 42.5,
        "vendor": "Cafe Uno",
        "date": "2024-03-14",
    })
}

async fn job_eventually(client: &reqwest::Client, srv: &TestServer, job_id: &str) -> Value {
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/api/v1/retrain-models/jobs/{job_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let job: Value = res.json().await.unwrap();
        if job["state"] == "succeeded" || job["state"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} did not finish in time");
}

#[tokio::test]
async fn health_reports_capabilities_and_counters() {
    let srv = TestServer::spawn(CapabilitySet::heuristic()).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);
    for capability in Capability::ALL {
        assert_eq!(body["capabilities"][capability.as_str()]["healthy"], true);
    }
    assert_eq!(body["jobs"]["queued"], 0);
}

#[tokio::test]
async fn health_is_degraded_when_a_capability_is_down() {
    let script = Script::new();
    script.fail_capability(Capability::Ocr);
    let srv = TestServer::spawn(script.capability_set()).await;

    let body: Value = reqwest::get(srv.url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["capabilities"]["ocr"]["healthy"], false);
    assert_eq!(body["capabilities"]["categorization"]["healthy"], true);
}

#[tokio::test]
async fn categorize_expense_returns_prediction() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/categorize-expense"))
        .json(&expense("e-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["expense_id"], "e-1");
    assert_eq!(body["predicted_category"], "meals");
}

#[tokio::test]
async fn invalid_expense_is_rejected_without_calling_providers() {
    let script = Script::new();
    let srv = TestServer::spawn(script.capability_set()).await;
    let client = reqwest::Client::new();

    let mut bad = expense("e-1");
    bad["amount"] = json!(-3.0);
    let res = client
        .post(srv.url("/api/v1/categorize-expense"))
        .json(&bad)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    let res = client
        .post(srv.url("/api/v1/categorize-expense"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    assert_eq!(script.calls(), 0);
}

#[tokio::test]
async fn provider_failure_is_generic_500() {
    let script = Script::new();
    script.fail("e-1");
    let srv = TestServer::spawn(script.capability_set()).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/categorize-expense"))
        .json(&expense("e-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "capability_failure");
    assert_eq!(body["message"], "Failed to categorize expense");
}

#[tokio::test]
async fn batch_reports_per_item_status_in_order() {
    let script = Script::new();
    script.slow("b", Duration::from_millis(500)).fail("c");
    let srv = TestServer::spawn_with(script.capability_set(), |cfg| {
        cfg.dispatch_timeout = Duration::from_millis(100);
    })
    .await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/batch-categorize"))
        .json(&json!([expense("a"), expense("b"), expense("c"), expense("d")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let items: Vec<Value> = res.json().await.unwrap();

    let summary: Vec<(String, String)> = items
        .iter()
        .map(|i| {
            (
                i["expense_id"].as_str().unwrap().to_string(),
                i["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a".to_string(), "ok".to_string()),
            ("b".to_string(), "error".to_string()),
            ("c".to_string(), "error".to_string()),
            ("d".to_string(), "ok".to_string()),
        ]
    );
    assert_eq!(items[1]["error"]["error"], "capability_timeout");
    assert_eq!(items[2]["error"]["error"], "capability_failure");
    assert_eq!(items[0]["result"]["predicted_category"], "meals");
}

#[tokio::test]
async fn oversized_and_empty_batches_are_rejected() {
    let srv = TestServer::spawn_with(Script::new().capability_set(), |cfg| {
        cfg.max_batch_size = 2;
    })
    .await;
    let client = reqwest::Client::new();

    for body in [json!([]), json!([expense("a"), expense("b"), expense("c")])] {
        let res = client
            .post(srv.url("/api/v1/batch-categorize"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn forecast_horizon_is_bounded() {
    let script = Script::new();
    let srv = TestServer::spawn(script.capability_set()).await;
    let client = reqwest::Client::new();

    for months in [0, 13] {
        let res = client
            .post(srv.url("/api/v1/predict-budget"))
            .json(&json!({ "historical_data": [expense("h-1")], "prediction_months": months }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(script.calls(), 0);

    let res = client
        .post(srv.url("/api/v1/predict-budget"))
        .json(&json!({ "historical_data": [expense("h-1")] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["horizon_months"], 3);
}

#[tokio::test]
async fn trends_and_approval_time_shapes() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/analyze-trends"))
        .json(&json!({ "expenses": [expense("t-1")], "analysis_type": "weekly" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["analysis_type"], "weekly");

    let res = client
        .post(srv.url("/api/v1/analyze-trends"))
        .json(&json!({ "expenses": [expense("t-1")], "analysis_type": "hourly" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/api/v1/predict-approval-time"))
        .json(&json!({ "expense": expense("p-1"), "approval_history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["estimated_hours"], 6.0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn fraud_risk_and_tagging_endpoints() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/detect-fraud"))
        .json(&json!({ "expense": expense("f-1"), "user_history": [expense("f-0")] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["risk_level"], "low");

    let res = client
        .post(srv.url("/api/v1/risk-assessment"))
        .json(&json!({ "expense": expense("f-1"), "company_policies": { "max_meal": 50 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["risk_score"], 0.42);

    let res = client
        .post(srv.url("/api/v1/auto-tag"))
        .json(&expense("g-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tags"], json!(["scripted"]));
    assert_eq!(body["metadata"]["expense_id"], "g-1");
}

#[tokio::test]
async fn receipt_upload_is_released_after_validation() {
    let script = Script::new();
    let srv = TestServer::spawn(script.capability_set()).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"TOTAL 12.00".to_vec()).file_name("receipt.png"),
    );
    let res = client
        .post(srv.url("/api/v1/validate-receipt"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let seen = script.artifacts_seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1, "provider saw the stored file");
    assert!(!seen[0].0.exists(), "artifact removed after the call");
    assert_eq!(std::fs::read_dir(srv.artifact_dir()).unwrap().count(), 0);

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"TOTAL 12.00".to_vec()).file_name("receipt.png"),
    );
    let res = client
        .post(srv.url("/api/v1/enhanced-ocr?enhance_image=false"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["enhanced"], false);
}

#[tokio::test]
async fn receipt_upload_requires_file_field() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;

    let form = reqwest::multipart::Form::new().text("note", "no file here");
    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/validate-receipt"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enhanced_ocr_rejects_malformed_query_as_json() {
    let script = Script::new();
    let srv = TestServer::spawn(script.capability_set()).await;

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"TOTAL 3.50".to_vec()).file_name("receipt.png"),
    );
    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/enhanced-ocr?enhance_image=maybe"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(script.artifacts_seen().is_empty());
}

#[tokio::test]
async fn model_performance_reports_null_for_failing_capability() {
    let script = Script::new();
    script.fail_capability(Capability::FraudDetection);
    let srv = TestServer::spawn(script.capability_set()).await;

    let body: Value = reqwest::get(srv.url("/api/v1/model-performance"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["metrics"]["categorization"], 0.9);
    assert!(body["metrics"]["fraud_detection"].is_null());
}

#[tokio::test]
async fn retraining_is_accepted_and_tracked() {
    let script = Script::new();
    script.fail_retrain(Capability::Ocr);
    let srv = TestServer::spawn(script.capability_set()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/retrain-models"))
        .json(&json!({
            "categorization": [{ "description": "taxi", "category": "travel" }],
            "ocr": [{ "text": "TOTAL" }],
            "unknown_capability": [1, 2, 3],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    assert_eq!(accepted["targeted_capabilities"], json!(["categorization", "ocr"]));
    assert!(accepted["estimated_completion"].is_string());
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let job = job_eventually(&client, &srv, &job_id).await;
    assert_eq!(job["state"], "failed");
    assert_eq!(job["runs"]["categorization"]["state"], "succeeded");
    assert_eq!(job["runs"]["ocr"]["state"], "failed");

    let jobs: Vec<Value> = client
        .get(srv.url("/api/v1/retrain-models/jobs?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], job_id);
}

#[tokio::test]
async fn retraining_rejects_unusable_payloads() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let client = reqwest::Client::new();

    for payload in [
        json!({ "unknown_capability": [1] }),
        json!({ "categorization": [] }),
        json!(["categorization"]),
    ] {
        let res = client
            .post(srv.url("/api/v1/retrain-models"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "job_submission_error");
    }
}

#[tokio::test]
async fn unknown_job_is_404_and_bad_id_is_400() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/api/v1/retrain-models/jobs/0190b5b4-9b1a-7cc3-8c3e-6a5f3c1d2e4f"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/api/v1/retrain-models/jobs/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn websocket_session_answers_each_message_and_survives_bad_input() {
    let srv = TestServer::spawn(Script::new().capability_set()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(srv.ws_url.as_str())
        .await
        .expect("ws connect");

    ws.send(Message::Text(expense("r-1").to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["expense_id"], "r-1");
    assert_eq!(reply["category"]["predicted_category"], "meals");
    assert_eq!(reply["fraud_alert"]["risk_level"], "low");
    assert_eq!(reply["errors"], json!([]));

    ws.send(Message::Text("{\"id\": ".to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["error"], "invalid_request");
    assert!(reply["timestamp"].is_string());

    ws.send(Message::Text(expense("r-2").to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["expense_id"], "r-2");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn websocket_partial_failure_is_reported_inline() {
    let script = Script::new();
    script.fail_capability(Capability::FraudDetection);
    let srv = TestServer::spawn(script.capability_set()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(srv.ws_url.as_str())
        .await
        .expect("ws connect");

    ws.send(Message::Text(expense("r-1").to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["category"]["predicted_category"], "meals");
    assert!(reply["fraud_alert"].is_null());
    assert_eq!(reply["errors"][0]["capability"], "fraud_detection");
}

#[tokio::test]
async fn idle_websocket_is_closed_by_server() {
    let srv = TestServer::spawn_with(Script::new().capability_set(), |cfg| {
        cfg.session_idle_timeout = Some(Duration::from_millis(100));
    })
    .await;
    let (mut ws, _) = tokio_tungstenite::connect_async(srv.ws_url.as_str())
        .await
        .expect("ws connect");

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server closes idle session");
    match frame {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("reply in time")
            .expect("stream open")
            .expect("frame");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
