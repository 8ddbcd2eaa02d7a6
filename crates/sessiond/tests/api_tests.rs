//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use axum_test::TestServer;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{TEST_PORT, TEST_SECRET, test_app_with_token};

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn start(app: &Router, token: &str) -> String {
    let (status, body) = send(app, Method::POST, "/api/start", Some(token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["uuid"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_start_then_terminate_twice() {
    let app = test_app_with_token();

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/start",
        Some(app.token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let uuid = body["uuid"].as_str().unwrap().to_string();
    assert_eq!(uuid.len(), 36);
    assert!(uuid::Uuid::parse_str(&uuid).is_ok());
    assert_eq!(
        body["stdio-url"],
        format!("ws://localhost:{TEST_PORT}/ws?uuid={uuid}")
    );
    assert!(body["container-id"].is_string());
    assert!(app.transcript_path(&uuid).exists());

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/terminate",
        Some(app.token.as_str()),
        Some(json!({ "uuid": uuid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "ok", "message": format!("Container {uuid} terminated.") })
    );
    assert!(!app.transcript_path(&uuid).exists());

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/terminate",
        Some(app.token.as_str()),
        Some(json!({ "uuid": uuid })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid or unknown UUID" }));
}

#[tokio::test]
async fn test_restart_returns_container_name() {
    let app = test_app_with_token();
    let uuid = start(&app.router, &app.token).await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/restart",
        Some(app.token.as_str()),
        Some(json!({ "uuid": uuid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], uuid);
    assert_eq!(body["container-id"], format!("container-{uuid}"));

    let content = std::fs::read_to_string(app.transcript_path(&uuid)).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(">Container started</message>"));
    assert!(lines[1].ends_with(">Container restarted</message>"));
}

#[tokio::test]
async fn test_unknown_and_malformed_uuids_rejected() {
    let app = test_app_with_token();
    let unknown = uuid::Uuid::new_v4().to_string();

    for path in ["/api/restart", "/api/terminate", "/api/delete"] {
        for uuid in [unknown.as_str(), "not-a-uuid", "../../etc/passwd"] {
            let (status, body) = send(
                &app.router,
                Method::POST,
                path,
                Some(app.token.as_str()),
                Some(json!({ "uuid": uuid })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {uuid}");
            assert_eq!(body["error"], "Invalid or unknown UUID");
        }
    }
}

#[tokio::test]
async fn test_bad_body_is_bad_request() {
    let app = test_app_with_token();

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/restart",
        Some(app.token.as_str()),
        Some(json!({ "id": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .uri("/api/terminate")
        .method(Method::POST)
        .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_requests_without_valid_token_rejected() {
    let app = test_app_with_token();

    let (status, body) = send(&app.router, Method::POST, "/api/start", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().starts_with("Unauthorized"));

    let (status, _) = send(
        &app.router,
        Method::POST,
        "/api/start",
        Some("not.a.token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let other = sessiond::auth::AuthState::new(sessiond::auth::AuthConfig::with_secret(
        "a-completely-different-secret-of-enough-length",
    ));
    let forged = other.generate_token("mallory", None).unwrap();
    let (status, _) = send(
        &app.router,
        Method::POST,
        "/api/start",
        Some(forged.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nothing was provisioned.
    assert!(app.lifecycle.registry().ids().is_empty());
    assert!(app.runtime.volumes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let app = test_app_with_token();
    let expired = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": "tester", "exp": chrono::Utc::now().timestamp() - 1 }),
        &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/start",
        Some(expired.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().starts_with("Unauthorized"));
}

#[tokio::test]
async fn test_unmatched_route_is_not_found() {
    let app = test_app_with_token();

    for token in [None, Some(app.token.as_str())] {
        let (status, body) = send(&app.router, Method::GET, "/api/nope", token, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Not found" }));
    }

    // Known paths with the wrong method are unmatched too.
    for (method, uri) in [
        (Method::GET, "/api/start"),
        (Method::DELETE, "/api/delete"),
        (Method::POST, "/openapi.json"),
    ] {
        for token in [None, Some(app.token.as_str())] {
            let (status, body) = send(&app.router, method.clone(), uri, token, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(body, json!({ "error": "Not found" }));
        }
    }
    assert!(app.lifecycle.registry().ids().is_empty());
}

#[tokio::test]
async fn test_openapi_is_public() {
    let app = test_app_with_token();
    let (status, body) = send(&app.router, Method::GET, "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/start"]["post"].is_object());
}

#[tokio::test]
async fn test_delete_running_then_stopped() {
    let app = test_app_with_token();
    let uuid = start(&app.router, &app.token).await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/delete",
        Some(app.token.as_str()),
        Some(json!({ "uuid": uuid })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], format!("Container {uuid} is still running"));
    assert!(app.transcript_path(&uuid).exists());

    // The container exits on its own.
    app.runtime
        .set_state(&sessiond::session::container_name(&uuid), "exited");

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/delete",
        Some(app.token.as_str()),
        Some(json!({ "uuid": uuid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "ok", "message": format!("Container {uuid} deleted.") })
    );
    assert!(!app.transcript_path(&uuid).exists());
    assert!(app.runtime.volumes.lock().unwrap().is_empty());
    assert!(app.runtime.containers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_runtime_failure_is_generic_500_and_logged() {
    let app = test_app_with_token();
    app.runtime.fail("run");

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/start",
        Some(app.token.as_str()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(!message.contains("secret stderr"));
    assert_eq!(body.as_object().unwrap().len(), 1);

    assert!(app.lifecycle.registry().ids().is_empty());
    assert!(app.runtime.volumes.lock().unwrap().is_empty());

    let log = std::fs::read_to_string(&app.error_log).unwrap();
    assert!(log.contains(" | ERROR: start | "));
    assert!(log.contains("secret stderr from run"));
}

#[tokio::test]
async fn test_full_lifecycle_with_test_server() {
    let app = test_app_with_token();
    let server = TestServer::new(app.router.clone()).unwrap();

    let response = server
        .post("/api/start")
        .authorization_bearer(&app.token)
        .await;
    response.assert_status_ok();
    let started: Value = response.json();
    let uuid = started["uuid"].as_str().unwrap().to_string();

    let response = server
        .post("/api/restart")
        .authorization_bearer(&app.token)
        .json(&json!({ "uuid": uuid }))
        .await;
    response.assert_status_ok();

    let response = server
        .post("/api/terminate")
        .authorization_bearer(&app.token)
        .json(&json!({ "uuid": uuid }))
        .await;
    response.assert_status_ok();
    let terminated: Value = response.json();
    assert_eq!(terminated["message"], format!("Container {uuid} terminated."));

    let response = server
        .post("/api/restart")
        .authorization_bearer(&app.token)
        .json(&json!({ "uuid": uuid }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
