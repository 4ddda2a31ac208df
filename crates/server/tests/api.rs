//! End-to-end tests for the HTTP surface, driven through the router with
//! `tower::ServiceExt::oneshot`. The worker pool is live; the dispatch loop
//! is not started, so only manual polls and runs execute.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use netpulse_core::{Config, Connector, RawFinding, Severity};
use netpulse_scheduler::{Driver, DriverError, DriverRegistry, TaskContext};
use netpulse_server::{build_app_state, build_router};

// ── Fixtures ────────────────────────────────────────────────────────

/// Ping driver that reports the host unreachable once the gate opens.
struct GatedPing {
    gate: Semaphore,
}

#[async_trait::async_trait]
impl Driver for GatedPing {
    fn name(&self) -> &str {
        "gated-ping"
    }

    async fn poll(&self, connector: &Connector, ctx: &TaskContext) -> Result<Vec<RawFinding>, DriverError> {
        tokio::select! {
            permit = self.gate.acquire() => {
                permit.map(|p| p.forget()).map_err(|_| DriverError::Cancelled)?;
            }
            _ = ctx.cancelled() => return Err(DriverError::Cancelled),
        }
        Ok(vec![RawFinding::new("ping", "unreachable", Severity::Major)
            .device_ip(connector.config.target().unwrap_or_default())
            .message("100% packet loss")])
    }
}

struct Harness {
    app: Router,
    driver: Arc<GatedPing>,
}

fn harness() -> Harness {
    let driver = Arc::new(GatedPing { gate: Semaphore::new(0) });
    let mut drivers = DriverRegistry::new();
    drivers.register("ping", driver.clone());

    let mut config = Config::default();
    config.workers.rate_limit = 0;
    config.workers.cancel_grace_secs = 1;

    let state = build_app_state(config, drivers).unwrap();
    Harness {
        app: build_router(state),
        driver,
    }
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    async fn raw(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, bytes)
    }

    async fn create_ping(&self, id: &str, host: &str) {
        let (status, _) = self
            .call(
                "PUT",
                &format!("/connectors/{}", id),
                Some(json!({ "config": { "type": "ping", "host": host }, "poll_interval_secs": 300 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn wait_for_state(&self, task_id: &str, want: &str) -> Value {
        for _ in 0..500 {
            let (_, job) = self.call("GET", &format!("/executions/{}", task_id), None).await;
            if job["state"] == want {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} never reached {}", task_id, want);
    }

    async fn wait_for_idle(&self, connector: &str) {
        for _ in 0..500 {
            let (_, c) = self.call("GET", &format!("/connectors/{}", connector), None).await;
            if c["in_flight"] == false {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connector {} stayed in flight", connector);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();
    let (status, body) = h.call("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dispatcher"], "idle");
}

#[tokio::test]
async fn connector_crud() {
    let h = harness();
    h.create_ping("edge-1", "10.1.1.1").await;

    let (status, body) = h.call("GET", "/connectors/edge-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["in_flight"], false);
    assert_eq!(body["config"]["type"], "ping");

    let (status, body) = h
        .call("PUT", "/connectors/edge-1", Some(json!({ "enabled": false })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);

    let (_, list) = h.call("GET", "/connectors?enabled=true", None).await;
    assert_eq!(list.as_array().unwrap().len(), 0);

    let (status, body) = h
        .call(
            "PUT",
            "/connectors/edge-1",
            Some(json!({ "config": { "type": "ping", "host": "10.1.1.1" }, "poll_interval_secs": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Validation"));

    let (status, _) = h.call("DELETE", "/connectors/edge-1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = h.call("GET", "/connectors/edge-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_poll_conflicts_while_in_flight_then_raises_an_alert() {
    let h = harness();
    h.create_ping("edge-1", "10.1.1.1").await;

    let (status, job) = h.call("POST", "/connectors/edge-1/poll", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job["kind"], "manual");
    let task_id = job["task_id"].as_str().unwrap().to_string();

    let (status, body) = h.call("POST", "/connectors/edge-1/poll", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().starts_with("Conflict"));

    let (status, _) = h.call("DELETE", "/connectors/edge-1", None).await;
    assert_eq!(status, StatusCode::CONFLICT, "in-flight connectors cannot be removed");

    h.driver.gate.add_permits(1);
    let job = h.wait_for_state(&task_id, "succeeded").await;
    assert_eq!(job["result"]["findings"], 1);
    h.wait_for_idle("edge-1").await;

    let (_, connector) = h.call("GET", "/connectors/edge-1", None).await;
    assert_eq!(connector["status"], "connected");

    let (status, alerts) = h.call("GET", "/alerts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts["total"], 1);
    assert_eq!(alerts["items"][0]["device_ip"], "10.1.1.1");
    assert_eq!(alerts["items"][0]["connector_id"], "edge-1");
    assert_eq!(alerts["aggregate"]["by_status"]["active"], 1);
    assert_eq!(alerts["aggregate"]["by_severity"]["major"], 1);

    // A second poll folds into the same alert.
    let (_, job) = h.call("POST", "/connectors/edge-1/poll", None).await;
    h.driver.gate.add_permits(1);
    h.wait_for_state(job["task_id"].as_str().unwrap(), "succeeded").await;
    h.wait_for_idle("edge-1").await;

    let (_, alerts) = h.call("GET", "/alerts", None).await;
    assert_eq!(alerts["total"], 1);
    assert_eq!(alerts["items"][0]["occurrence_count"], 2);
}

#[tokio::test]
async fn alert_actions_follow_the_state_machine() {
    let h = harness();
    h.create_ping("edge-1", "10.1.1.1").await;
    h.driver.gate.add_permits(1);
    let (_, job) = h.call("POST", "/connectors/edge-1/poll", None).await;
    h.wait_for_state(job["task_id"].as_str().unwrap(), "succeeded").await;
    h.wait_for_idle("edge-1").await;

    let (_, alerts) = h.call("GET", "/alerts", None).await;
    let id = alerts["items"][0]["id"].as_str().unwrap().to_string();

    let (status, alert) = h.call("POST", &format!("/alerts/{}/acknowledge", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["status"], "acknowledged");

    let (status, body) = h.call("POST", &format!("/alerts/{}/unsuppress", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("acknowledged"));

    let (status, alert) = h
        .call(
            "POST",
            &format!("/alerts/{}/suppress", id),
            Some(json!({ "until": "2999-01-01T00:00:00Z" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["status"], "suppressed");
    assert_eq!(alert["suppressed_until"], "2999-01-01T00:00:00Z");

    let (status, _) = h.call("POST", &format!("/alerts/{}/resolve", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, open) = h.call("GET", "/alerts", None).await;
    assert_eq!(open["total"], 0, "resolved alerts hidden by default");
    let (_, resolved) = h.call("GET", "/alerts?status=resolved", None).await;
    assert_eq!(resolved["total"], 1);
    let (_, agg) = h.call("GET", "/alerts/aggregate?status=resolved", None).await;
    assert_eq!(agg["by_status"]["resolved"], 1);

    let (status, _) = h.call("POST", &format!("/alerts/{}/acknowledge", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = h.call("POST", &format!("/alerts/{}/snooze", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = h.call("GET", "/alerts?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_a_running_poll() {
    let h = harness();
    h.create_ping("edge-1", "10.1.1.1").await;
    let (_, job) = h.call("POST", "/connectors/edge-1/poll", None).await;
    let task_id = job["task_id"].as_str().unwrap().to_string();
    h.wait_for_state(&task_id, "running").await;

    let (status, _) = h.call("POST", &format!("/executions/{}/cancel", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    h.wait_for_state(&task_id, "cancelled").await;
    h.wait_for_idle("edge-1").await;

    let (status, _) = h.call("POST", &format!("/executions/{}/cancel", task_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "already terminal");

    let (_, alerts) = h.call("GET", "/alerts", None).await;
    assert_eq!(alerts["total"], 0, "cancelled polls never reach the correlator");
}

#[tokio::test]
async fn execution_lookup_errors() {
    let h = harness();
    let (status, _) = h.call("GET", "/executions/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = h
        .call("POST", "/executions/00000000-0000-0000-0000-000000000000/cancel", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scheduled_jobs_toggle_and_run() {
    let h = harness();
    let (status, jobs) = h.call("GET", "/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = jobs
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"alerts.expire_suppressions"));
    assert!(names.contains(&"executions.prune"));

    let (status, job) = h.call("POST", "/jobs/executions.prune/toggle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["enabled"], false);

    let (status, job) = h.call("POST", "/jobs/alerts.expire_suppressions/run", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let done = h
        .wait_for_state(job["task_id"].as_str().unwrap(), "succeeded")
        .await;
    assert_eq!(done["result"]["expired"], 0);

    let (status, _) = h.call("POST", "/jobs/nope/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, executions) = h.call("GET", "/executions?kind=manual", None).await;
    assert_eq!(executions["items"].as_array().unwrap().len(), 1);
    assert_eq!(executions["counts"]["succeeded"], 1);
}

#[tokio::test]
async fn stream_ends_with_the_terminal_state() {
    let h = harness();
    let (_, job) = h.call("POST", "/jobs/executions.prune/run", None).await;
    let task_id = job["task_id"].as_str().unwrap().to_string();
    h.wait_for_state(&task_id, "succeeded").await;

    let (status, body) = h.raw("GET", &format!("/executions/{}/stream", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("event: done"), "{}", text);
    assert!(text.contains("\"state\":\"succeeded\""));
}

#[tokio::test]
async fn queue_status_and_metrics() {
    let h = harness();
    h.create_ping("edge-1", "10.1.1.1").await;

    let (status, queue) = h.call("GET", "/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["capacity"], 8);
    assert_eq!(queue["scheduled"], 3, "one connector plus two built-in jobs");
    assert_eq!(queue["workers"].as_array().unwrap().len(), 2);
    assert_eq!(queue["rate_limit"], Value::Null);

    let (status, metrics) = h.call("GET", "/scheduler/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["backpressure_rejections"], 0);

    let (status, config) = h.call("GET", "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["workers"]["worker_count"], 2);
}
