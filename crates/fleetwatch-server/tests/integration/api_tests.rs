use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::TimeDelta;
use http_body_util::BodyExt;
use tower::ServiceExt;

use fleetwatch_core::AppError;
use fleetwatch_core::testutil::{alarm_row, gps_row, malformed_row};

use crate::integration::common::{
    ALARM_VIEW, GPS_VIEW, TEST_ADMIN_TOKEN, setup_test_app, setup_test_app_no_auth,
};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

fn rejected() -> Result<(), AppError> {
    Err(AppError::AuthenticationFailed("Login failed!".into()))
}

#[tokio::test]
async fn root_reports_running() {
    let app = setup_test_app();

    let (status, json) = get(&app.router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "API is running!");
}

#[tokio::test]
async fn status_before_first_cycle() {
    let app = setup_test_app();

    let (status, json) = get(&app.router, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["logged_in"], false);
    assert_eq!(json["login_attempts"], 0);
    assert_eq!(json["scrape_attempts"]["gps"], 0);
    assert_eq!(json["session_state"], "logged_out");
    assert!(json["last_failure_time"].is_null());
    assert_eq!(json["retry_at"], serde_json::json!({}));
}

#[tokio::test]
async fn three_login_failures_show_in_status() {
    let app = setup_test_app();
    for _ in 0..3 {
        app.remote.push_auth(rejected());
    }
    for _ in 0..3 {
        app.orchestrator.run_cycle().await;
    }

    let (_, json) = get(&app.router, "/status").await;
    assert_eq!(json["login_attempts"], 3);
    assert_eq!(json["logged_in"], false);
    assert!(json["errors"].is_string());
    assert!(json["last_failure_time"].is_string());
    assert_eq!(json["halted"], serde_json::json!(["login"]));
    assert_eq!(
        json["retry_at"],
        serde_json::json!({"login": "2024-05-01T14:00:00Z"})
    );

    let report = app.orchestrator.run_cycle().await;
    assert!(matches!(
        report.session_error,
        Some(AppError::MaxLoginAttemptsExceeded)
    ));
    assert_eq!(app.remote.auth_calls(), 3);
}

#[tokio::test]
async fn gps_without_data() {
    let app = setup_test_app();

    let (status, json) = get(&app.router, "/gps").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({"error": "No gps data available"}));
}

#[tokio::test]
async fn gps_returns_only_well_formed_rows() {
    let app = setup_test_app();
    app.remote.push_rows(
        GPS_VIEW,
        Ok(vec![gps_row(1), gps_row(2), malformed_row(), gps_row(3)]),
    );
    app.remote.push_rows(ALARM_VIEW, Ok(vec![alarm_row(1)]));
    app.orchestrator.run_cycle().await;

    let (_, json) = get(&app.router, "/gps").await;
    let records = json["gps_data"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["target_name"], "Truck 1");
    assert_eq!(records[2]["address"], "3 Harbour Road");
    assert!(json.get("error").is_none());

    let (_, json) = get(&app.router, "/alarms").await;
    assert_eq!(json["alarm_data"][0]["alarm_type"], "Overspeed");

    let (_, json) = get(&app.router, "/status").await;
    assert_eq!(json["scrape_attempts"]["gps"], 0);
}

#[tokio::test]
async fn stale_gps_served_after_failed_cycle() {
    let app = setup_test_app();
    app.remote.push_rows(GPS_VIEW, Ok(vec![gps_row(1)]));
    app.remote.push_rows(ALARM_VIEW, Ok(vec![alarm_row(1)]));
    app.remote.push_rows(
        GPS_VIEW,
        Err(AppError::NavigationError("table did not load".into())),
    );
    app.remote.push_rows(ALARM_VIEW, Ok(vec![alarm_row(2)]));

    app.orchestrator.run_cycle().await;
    app.orchestrator.run_cycle().await;

    let (_, json) = get(&app.router, "/gps").await;
    assert_eq!(json["gps_data"][0]["target_name"], "Truck 1");

    let (_, json) = get(&app.router, "/status").await;
    assert!(
        json["errors"]
            .as_str()
            .unwrap()
            .contains("table did not load")
    );
}

#[tokio::test]
async fn halted_kind_returns_error_with_stale_data() {
    let app = setup_test_app();
    app.remote.push_rows(GPS_VIEW, Ok(vec![gps_row(1)]));
    for _ in 0..3 {
        app.remote
            .push_rows(GPS_VIEW, Err(AppError::NavigationError("gone".into())));
    }
    for _ in 0..4 {
        app.remote.push_rows(ALARM_VIEW, Ok(vec![alarm_row(1)]));
        app.orchestrator.run_cycle().await;
    }

    let (status, json) = get(&app.router, "/gps").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"], "Max scrape attempts reached");
    assert_eq!(json["gps_data"].as_array().unwrap().len(), 1);

    let (_, json) = get(&app.router, "/alarms").await;
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn halt_without_snapshot_returns_error_only() {
    let app = setup_test_app();
    for _ in 0..3 {
        app.remote
            .push_rows(ALARM_VIEW, Err(AppError::NavigationError("gone".into())));
        app.orchestrator.run_cycle().await;
    }

    let (_, json) = get(&app.router, "/alarms").await;
    assert_eq!(
        json,
        serde_json::json!({"error": "Max scrape attempts reached"})
    );
}

#[tokio::test]
async fn status_heals_after_cooldown() {
    let app = setup_test_app();
    for _ in 0..3 {
        app.remote.push_auth(rejected());
        app.orchestrator.run_cycle().await;
    }

    app.clock.advance(TimeDelta::hours(6));

    let (_, json) = get(&app.router, "/status").await;
    assert_eq!(json["login_attempts"], 0);
    assert!(json["last_failure_time"].is_null());
}

#[tokio::test]
async fn reset_requires_admin_token() {
    let app = setup_test_app();

    let (status, json) = get(&app.router, "/reset").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let (status, _) = send(
        &app.router,
        Request::get("/reset")
            .header("authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reset_clears_counters() {
    let app = setup_test_app();
    for _ in 0..3 {
        app.remote.push_auth(rejected());
        app.orchestrator.run_cycle().await;
    }

    let (status, json) = send(
        &app.router,
        Request::get("/reset")
            .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Attempt counters reset");

    let (_, json) = get(&app.router, "/status").await;
    assert_eq!(json["login_attempts"], 0);
    assert_eq!(json["halted"], serde_json::json!([]));
}

#[tokio::test]
async fn admin_endpoints_open_without_token() {
    let app = setup_test_app_no_auth();

    let (status, _) = get(&app.router, "/reset").await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_runs_single_kind() {
    let app = setup_test_app_no_auth();
    app.remote.push_rows(ALARM_VIEW, Ok(vec![alarm_row(1), alarm_row(2)]));

    let (status, json) = send(
        &app.router,
        Request::post("/refresh?kind=alarm")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["results"][0]["kind"], "alarm");
    assert_eq!(json["results"][0]["status"], "ok");
    assert_eq!(json["results"][0]["records"], 2);
    assert!(app.remote.fetch_calls(GPS_VIEW).is_empty());
}

#[tokio::test]
async fn refresh_reports_session_failure() {
    let app = setup_test_app_no_auth();
    app.remote.push_auth(rejected());

    let (status, json) = send(
        &app.router,
        Request::post("/refresh").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        json["session_error"]
            .as_str()
            .unwrap()
            .contains("Login failed!")
    );
    assert_eq!(json["results"], serde_json::json!([]));
}

#[tokio::test]
async fn refresh_unknown_kind_is_bad_request() {
    let app = setup_test_app_no_auth();

    let (status, json) = send(
        &app.router,
        Request::post("/refresh?kind=speed")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert!(json["message"].as_str().unwrap().contains("speed"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app();

    let (status, json) = get(&app.router, "/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/gps"].is_object());
    assert!(json["paths"]["/refresh"].is_object());
}
