//! Control plane over real HTTP.

use crate::helpers::{Harness, harness, login_epic};
use reqwatch::MonitorConfig;
use reqwatch::api::ControlServer;
use reqwatch::monitor::{ItemStore, Monitor};
use reqwatch::test_utils::{RecordingWorkflow, ScriptedTracker};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;

struct Api {
    server: ControlServer,
    client: reqwest::Client,
}

impl Api {
    async fn serve(monitor: Monitor) -> Self {
        let server = ControlServer::start(monitor, "127.0.0.1:0").await.unwrap();
        Self {
            server,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.server.addr())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn patch(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .patch(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.delete(self.url(path)).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }
}

async fn serve_harness(config: MonitorConfig) -> (Api, Harness) {
    let h = harness(config);
    let api = Api::serve(h.monitor.clone()).await;
    (api, h)
}

#[tokio::test]
async fn health_reports_ok() {
    let (api, _h) = serve_harness(MonitorConfig::default()).await;
    let (status, body) = api.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn add_check_and_inspect_an_item() {
    let (api, h) = serve_harness(MonitorConfig::default()).await;
    h.tracker.set("42", login_epic());

    let (status, body) = api
        .post("/api/monitor/items", Some(json!({ "id": "42" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], true);

    let (_, again) = api
        .post("/api/monitor/items", Some(json!({ "id": "42" })))
        .await;
    assert_eq!(again["success"], true);
    assert_eq!(again["added"], false);
    assert_eq!(again["message"], "already present");

    let (status, body) = api.post("/api/monitor/items/42/check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reports"][0]["status"], "extracted");
    assert_eq!(body["reports"][0]["attempts"], 1);

    let (_, body) = api.get("/api/monitor/status").await;
    let monitor_status = &body["status"];
    assert_eq!(monitor_status["run_state"], "STOPPED");
    assert_eq!(monitor_status["statistics"]["total_items"], 1);
    assert_eq!(monitor_status["items"][0]["id"], "42");
    assert_eq!(monitor_status["items"][0]["phase"], "STABLE");
    assert_eq!(monitor_status["items"][0]["stories_extracted"], true);

    let (status, body) = api.get("/api/monitor/items/42/changes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changes"]["change_extraction_count"], 0);
    assert_eq!(body["changes"]["max_changes_per_item"], 5);
}

#[tokio::test]
async fn check_all_returns_one_report_per_item() {
    let (api, h) = serve_harness(MonitorConfig::default()).await;
    h.tracker.set("1", login_epic());
    h.tracker.set("2", login_epic());
    h.monitor.add_item("2").unwrap();
    h.monitor.add_item("1").unwrap();

    let (status, body) = api.post("/api/monitor/check", None).await;

    assert_eq!(status, StatusCode::OK);
    let reports = body["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["id"], "1");
    assert_eq!(reports[1]["id"], "2");
}

#[tokio::test]
async fn invalid_config_update_is_rejected_and_previous_kept() {
    let (api, _h) = serve_harness(MonitorConfig::default()).await;

    let (status, body) = api
        .patch(
            "/api/monitor/config",
            json!({ "change_significance_threshold": 1.5 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "CONFIG_INVALID");

    let (status, body) = api
        .patch("/api/monitor/config", json!({ "poll_interval_seconds": -5 }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CONFIG_INVALID");

    let (status, body) = api
        .patch("/api/monitor/config", json!({ "no_such_setting": true }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CONFIG_INVALID");

    let (_, body) = api.get("/api/monitor/config").await;
    assert_eq!(body["config"]["change_significance_threshold"], 0.3);
    assert_eq!(body["config"]["poll_interval_seconds"], 300);
}

#[tokio::test]
async fn valid_config_update_is_applied() {
    let (api, h) = serve_harness(MonitorConfig::default()).await;

    let (status, body) = api
        .patch(
            "/api/monitor/config",
            json!({
                "change_significance_threshold": 0.5,
                "max_changes_per_epic": 2,
                "scoring": { "state": 0.1 },
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["change_significance_threshold"], 0.5);
    assert_eq!(body["config"]["max_changes_per_item"], 2);
    assert_eq!(body["config"]["scoring"]["state"], 0.1);
    assert_eq!(body["config"]["scoring"]["title"], 0.35);
    assert_eq!(h.monitor.config().unwrap().max_changes_per_item, 2);
}

#[tokio::test]
async fn unknown_and_invalid_items_map_to_client_errors() {
    let (api, _h) = serve_harness(MonitorConfig::default()).await;

    let (status, body) = api.delete("/api/monitor/items/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UNKNOWN_ITEM");

    let (status, _) = api.post("/api/monitor/items/missing/check", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = api.post("/api/monitor/items/missing/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = api
        .post("/api/monitor/items", Some(json!({ "id": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ITEM_ID");
}

#[tokio::test]
async fn reextract_is_forbidden_without_manual_override() {
    let (api, h) = serve_harness(MonitorConfig {
        manual_override_enabled: false,
        ..Default::default()
    })
    .await;
    h.monitor.add_item("42").unwrap();

    let (status, body) = api.post("/api/monitor/items/42/reextract", None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "OVERRIDE_DISABLED");
}

#[tokio::test]
async fn reset_and_remove_round_trip() {
    let (api, h) = serve_harness(MonitorConfig::default()).await;
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();
    h.monitor.force_check(Some("42")).await.unwrap();

    let (status, body) = api.post("/api/monitor/items/42/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], true);
    assert!(!h.monitor.item_state("42").unwrap().unwrap().stories_extracted);

    let (status, body) = api.delete("/api/monitor/items/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
    assert!(h.monitor.item_ids().unwrap().is_empty());
}

#[tokio::test]
async fn start_and_stop_through_the_api() {
    let monitor = Monitor::builder(
        ItemStore::new(MonitorConfig::default()),
        Arc::new(ScriptedTracker::new()),
        Arc::new(RecordingWorkflow::succeeding()),
    )
    .build();
    let api = Api::serve(monitor).await;

    let (status, body) = api.post("/api/monitor/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_state"], "RUNNING");

    let (status, body) = api.post("/api/monitor/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SCHEDULER_STATE");

    let (status, body) = api.post("/api/monitor/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_state"], "STOPPED");

    let (status, _) = api.post("/api/monitor/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
