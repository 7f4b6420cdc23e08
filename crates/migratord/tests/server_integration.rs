//! Integration tests for the HTTP API.
//!
//! Drives full runs through the router against a shell stand-in for the
//! migration tool: bulk and single-repo flows, admission conflicts,
//! per-request credentials and stream expiry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use migrator_core::Config;
use migratord::coordinator::RunCoordinator;
use migratord::credentials::CredentialSet;
use migratord::server::{create_router, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Tool stand-in. `generate-script` waits `delay` seconds, then writes a
/// script that echoes the credentials it was given.
fn write_tool(dir: &Path, delay: &str) -> PathBuf {
    let tool = dir.join("gei");
    let body = format!(
        r#"#!/bin/sh
echo "$*" >> "{calls}"
cmd="$1"
shift
case "$cmd" in
  generate-script)
    sleep {delay}
    while [ $# -gt 0 ]; do
      if [ "$1" = "--output" ]; then out="$2"; fi
      shift
    done
    printf '#!/bin/sh\necho "repo one migrated"\necho "repo two migrated"\necho "source=$GH_SOURCE_PAT target=$GH_PAT" >&2\n' > "$out"
    ;;
  migrate-repo)
    echo "migrated $2 with $GH_SOURCE_PAT"
    ;;
  *)
    exit 2
    ;;
esac
"#,
        calls = dir.join("calls.log").display(),
    );
    std::fs::write(&tool, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    tool
}

fn create_test_app(dir: &Path, delay: &str, fallback: CredentialSet) -> axum::Router {
    let config = Config {
        tool_bin: write_tool(dir, delay),
        tool_args: Vec::new(),
        work_root: dir.join("work"),
        inherit_env: vec!["PATH".to_string()],
        ..Config::default()
    };
    let state = Arc::new(AppState {
        coordinator: Arc::new(RunCoordinator::new(config)),
        auth_token: None,
        fallback_credentials: fallback,
    });
    create_router(state)
}

fn env_credentials() -> CredentialSet {
    CredentialSet::new(Some("env-src".into()), Some("env-dst".into()))
}

async fn body_to_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn start_run(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn poll(token: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/runs/{token}/output"))
        .body(Body::empty())
        .unwrap()
}

/// Poll until `done`, returning every line seen and the number of polls
/// that reported completion.
async fn poll_until_done(app: &axum::Router, token: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for _ in 0..500 {
        let response: Response = app.clone().oneshot(poll(token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let chunk = body_to_json(response).await;
        for line in chunk["lines"].as_array().unwrap() {
            lines.push(line.as_str().unwrap().to_string());
        }
        if chunk["done"].as_bool().unwrap() {
            return lines;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {token} never finished; saw {lines:?}");
}

#[tokio::test]
async fn bulk_run_streams_script_output_then_expires() {
    let dir = TempDir::new().unwrap();
    let app = create_test_app(dir.path(), "0", env_credentials());

    let response: Response = app
        .clone()
        .oneshot(start_run(&serde_json::json!({
            "source_org": "acme",
            "target_org": "beta"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ticket = body_to_json(response).await;
    assert_eq!(ticket["mode"], "bulk");
    assert!(ticket["started_at"].is_string());
    let token = ticket["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 43);

    let lines = poll_until_done(&app, &token).await;
    let stdout: Vec<_> = lines.iter().filter(|l| l.starts_with("repo")).collect();
    assert_eq!(stdout, vec!["repo one migrated", "repo two migrated"]);
    assert!(lines.contains(&"source=env-src target=env-dst".to_string()));

    let response: Response = app.clone().oneshot(poll(&token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The per-run working directory is cleaned up once the run ends.
    let leftover: Vec<_> = std::fs::read_dir(dir.path().join("work"))
        .unwrap()
        .collect();
    assert!(leftover.is_empty(), "work root not cleaned: {leftover:?}");
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one() {
    let dir = TempDir::new().unwrap();
    let app = create_test_app(dir.path(), "0.5", env_credentials());

    let first = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(start_run(&serde_json::json!({
                "source_org": "acme",
                "target_org": "beta"
            })))
            .await
            .unwrap()
        })
    };
    let second = {
        let app = app.clone();
        tokio::spawn(async move {
            // Give the first request time to take the gate.
            tokio::time::sleep(Duration::from_millis(150)).await;
            app.oneshot(start_run(&serde_json::json!({
                "source_org": "acme",
                "target_org": "gamma"
            })))
            .await
            .unwrap()
        })
    };

    let first: Response = first.await.unwrap();
    let second: Response = second.await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let error = body_to_json(second).await;
    assert!(error["error"].as_str().unwrap().contains("already"));

    let token = body_to_json(first).await["token"]
        .as_str()
        .unwrap()
        .to_string();
    poll_until_done(&app, &token).await;

    let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
    assert_eq!(calls.lines().count(), 1, "only one generator ran: {calls}");
}

#[tokio::test]
async fn request_headers_supply_credentials() {
    let dir = TempDir::new().unwrap();
    let app = create_test_app(dir.path(), "0", CredentialSet::default());

    let body = serde_json::json!({
        "source_org": "acme",
        "source_repo": "widgets",
        "target_org": "beta"
    });

    let response: Response = app.clone().oneshot(start_run(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!dir.path().join("calls.log").exists());

    let response: Response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/runs")
                .header("content-type", "application/json")
                .header("x-source-token", "hdr-src")
                .header("x-target-token", "hdr-dst")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ticket = body_to_json(response).await;
    assert_eq!(ticket["mode"], "single_repo");

    let lines = poll_until_done(&app, ticket["token"].as_str().unwrap()).await;
    assert_eq!(lines, vec!["migrated widgets with hdr-src"]);
}

#[tokio::test]
async fn credentials_endpoint_merges_headers_with_fallback() {
    let dir = TempDir::new().unwrap();
    let app = create_test_app(
        dir.path(),
        "0",
        CredentialSet::new(None, Some("env-dst".into())),
    );

    let response: Response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        body_to_json(response).await,
        serde_json::json!({ "source": false, "target": true })
    );

    let response: Response = app
        .oneshot(
            Request::builder()
                .uri("/credentials")
                .header("x-source-token", "hdr-src")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        body_to_json(response).await,
        serde_json::json!({ "source": true, "target": true })
    );
}

#[tokio::test]
async fn health_reports_live_streams() {
    let dir = TempDir::new().unwrap();
    let app = create_test_app(dir.path(), "0", env_credentials());

    let response: Response = app
        .clone()
        .oneshot(start_run(&serde_json::json!({
            "source_org": "acme",
            "source_repo": "widgets",
            "target_org": "beta"
        })))
        .await
        .unwrap();
    let token = body_to_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let health = || {
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap()
    };

    let response: Response = app.clone().oneshot(health()).await.unwrap();
    let json = body_to_json(response).await;
    assert_eq!(json["streams"], 1);
    assert_eq!(json["busy"], false);

    poll_until_done(&app, &token).await;

    let response: Response = app.oneshot(health()).await.unwrap();
    assert_eq!(body_to_json(response).await["streams"], 0);
}
