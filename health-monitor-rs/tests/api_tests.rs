use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use config_rs::{ServiceSettings, Settings};
use health_monitor::app::{build_with_prober, App};
use health_monitor::{api, HttpProber};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(name: &str, url: Option<String>, required: bool) -> ServiceSettings {
    ServiceSettings {
        name: name.to_string(),
        required,
        health_check_url: url,
        health_check_timeout_secs: 1,
        startup_timeout_secs: 1,
        depends_on: Vec::new(),
        description: String::new(),
    }
}

fn base_settings(logs: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.startup.poll_interval_ms = 20;
    settings.startup.grace_period_ms = 10;
    settings.startup.dependency_poll_interval_ms = 10;
    settings.automation.log_dirs = vec![logs.path().join("app")];
    settings.automation.enabled = false;
    settings
}

async fn app_with(settings: Settings) -> App {
    build_with_prober(settings, Arc::new(HttpProber::new().unwrap()))
        .await
        .unwrap()
}

async fn call(app: &App, method: &str, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &App, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &App, request: Request<Body>) -> (StatusCode, Value) {
    let response = api::router(app.state.clone())
        .oneshot(request)
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_missing_configuration() {
    let logs = TempDir::new().unwrap();
    let mut settings = base_settings(&logs);
    settings.required_env = vec!["HEALTH_API_TEST_UNSET_SECRET".to_string()];
    let app = app_with(settings).await;

    let (status, body) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["missing_configuration"][0], "HEALTH_API_TEST_UNSET_SECRET");

    let (status, body) = call(&app, "GET", "/health/readiness").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["configuration"], false);

    let (status, body) = call(&app, "GET", "/health/liveness").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_detailed_health_after_startup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let logs = TempDir::new().unwrap();
    std::fs::create_dir_all(logs.path().join("app")).unwrap();
    let mut settings = base_settings(&logs);
    settings.services = vec![
        service("database", Some(server.uri()), true),
        {
            let mut ws = service("websocket_notifications", None, true);
            ws.depends_on = vec!["database".to_string()];
            ws
        },
    ];
    let app = app_with(settings).await;

    let (status, body) = call(&app, "GET", "/health/readiness").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["startup_complete"], false);

    app.run_startup().await.unwrap();

    let (status, body) = call(&app, "GET", "/health/detailed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(
        body["orchestration"]["order"],
        serde_json::json!(["database", "websocket_notifications"])
    );
    assert_eq!(body["components"]["database"]["status"], "healthy");

    let (status, _) = call(&app, "GET", "/health/readiness").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/health/services").await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["total"], 2);

    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_required_service_blocks_readiness() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let logs = TempDir::new().unwrap();
    std::fs::create_dir_all(logs.path().join("app")).unwrap();
    let mut settings = base_settings(&logs);
    settings.services = vec![
        service("database", Some(server.uri()), true),
        service("cache", None, false),
    ];
    let app = app_with(settings).await;
    app.run_startup().await.unwrap();

    let (status, body) = call(&app, "GET", "/health/detailed").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    let (status, body) = call(&app, "GET", "/health/readiness").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["failed_services"][0], "database");

    let (_, body) = call(&app, "GET", "/health/services").await;
    assert_eq!(body["status"], "degraded");

    app.shutdown().await;
}

#[tokio::test]
async fn test_automation_controls() {
    let logs = TempDir::new().unwrap();
    let app = app_with(base_settings(&logs)).await;

    let (_, body) = call(&app, "GET", "/health/automation").await;
    assert_eq!(body["enabled"], false);

    let (_, body) = call(&app, "POST", "/health/automation/enable").await;
    assert_eq!(body["enabled"], true);
    assert!(app.state.automation.is_enabled());

    // The log directory does not exist yet; a manual run creates it.
    let (status, body) = call(&app, "POST", "/health/automation/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["manual"], true);
    assert_eq!(body["actions_taken"].as_array().unwrap().len(), 1);
    assert!(logs.path().join("app").is_dir());

    let (_, body) = call(&app, "POST", "/health/automation/disable").await;
    assert_eq!(body["enabled"], false);

    let (_, body) = call(&app, "GET", "/health/automation").await;
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_agents_and_alerts_endpoints() {
    let logs = TempDir::new().unwrap();
    let mut settings = base_settings(&logs);
    settings.agents.names = vec!["job_matcher".to_string()];
    let app = app_with(settings).await;

    let (_, body) = call(&app, "GET", "/health/agents").await;
    assert_eq!(body["agents"][0]["name"], "job_matcher");
    assert_eq!(body["agents"][0]["state"], "idle");

    let (status, body) = call(&app, "POST", "/health/agents/recover/job_matcher").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "recovering");

    let (status, _) = call(&app, "POST", "/health/agents/recover/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&app, "GET", "/health/agents/performance").await;
    assert_eq!(body["agents"][0]["tasks_completed"], 0);

    let alert = app
        .state
        .alerts
        .create_alert(
            "docusign unreachable",
            health_monitor::AlertSeverity::High,
            Default::default(),
        )
        .await;

    let (_, body) = call(&app, "GET", "/health/alerts").await;
    assert_eq!(body["summary"]["active_alerts"], 1);

    let uri = format!("/health/alerts/{}/resolve", alert.id);
    let (status, _) = call(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/health/alerts/9999/resolve").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agents_report_in_over_http() {
    let logs = TempDir::new().unwrap();
    let mut settings = base_settings(&logs);
    settings.agents.names = vec!["resume_parser".to_string()];
    settings.agents.stale_after_secs = 1;
    settings.agents.failure_threshold = 2;
    let app = app_with(settings).await;

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let (_, body) = call(&app, "GET", "/health/agents").await;
    assert_eq!(body["agents"][0]["state"], "stalled");
    assert_eq!(body["status"], "unhealthy");

    let (status, body) = call(&app, "POST", "/health/agents/heartbeat/resume_parser").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    let (_, body) = call(&app, "GET", "/health/agents").await;
    assert_eq!(body["status"], "healthy");

    let (status, body) = post_json(
        &app,
        "/health/agents/tasks/resume_parser",
        serde_json::json!({ "duration_ms": 120, "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");

    for _ in 0..2 {
        post_json(
            &app,
            "/health/agents/tasks/resume_parser",
            serde_json::json!({ "duration_ms": 30, "success": false, "error": "pdf unreadable" }),
        )
        .await;
    }
    let (_, body) = call(&app, "GET", "/health/agents").await;
    assert_eq!(body["agents"][0]["state"], "failed");
    assert_eq!(body["agents"][0]["last_error"], "pdf unreadable");

    let (_, body) = call(&app, "GET", "/health/agents/performance").await;
    assert_eq!(body["agents"][0]["tasks_completed"], 1);
    assert_eq!(body["agents"][0]["tasks_failed"], 2);

    let (status, _) = call(&app, "POST", "/health/agents/heartbeat/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_json(
        &app,
        "/health/agents/tasks/ghost",
        serde_json::json!({ "duration_ms": 1, "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cyclic_configuration_is_rejected() {
    let logs = TempDir::new().unwrap();
    let mut settings = base_settings(&logs);
    let mut a = service("a", None, true);
    a.depends_on = vec!["b".to_string()];
    let mut b = service("b", None, true);
    b.depends_on = vec!["a".to_string()];
    settings.services = vec![a, b];

    let result = build_with_prober(settings, Arc::new(HttpProber::new().unwrap())).await;
    let err = result.err().unwrap();
    assert!(format!("{:#}", err).contains("circular dependency"));
}
