//! HTTP handlers for the session endpoints.

use axum::{Json, extract::State, extract::rejection::JsonRejection};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::auth::CurrentUser;
use crate::session::{RunningSession, SessionError};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

const STATUS_OK: &str = "ok";

/// Body of restart, terminate and delete.
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub uuid: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub status: String,
    pub uuid: String,
    #[serde(rename = "container-id")]
    pub container_id: String,
    #[serde(rename = "stdio-url")]
    pub stdio_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl SessionResponse {
    fn new(state: &AppState, session: RunningSession) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            stdio_url: state.stdio.url(&session.id),
            uuid: session.id,
            container_id: session.container_id,
        }
    }
}

/// Map a lifecycle failure to a response. Internal failures are recorded in
/// the error log and reach the client only as `public_message`.
async fn session_failure(
    state: &AppState,
    context: &str,
    public_message: &str,
    err: SessionError,
) -> ApiError {
    match err {
        SessionError::UnknownSession(_) => ApiError::unknown_uuid(),
        SessionError::StillRunning(id) => {
            ApiError::bad_request(format!("Container {id} is still running"))
        }
        other => {
            error!(context = %context, "session operation failed: {}", other);
            state.error_log.record(context, &other.to_string()).await;
            ApiError::internal(public_message)
        }
    }
}

fn session_request(payload: Result<Json<SessionRequest>, JsonRejection>) -> ApiResult<String> {
    let Json(request) = payload?;
    Ok(request.uuid)
}

/// Start a new session.
#[instrument(skip(state, user), fields(subject = %user.id()))]
pub async fn start_session(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<SessionResponse>> {
    let session = match state.lifecycle.create().await {
        Ok(session) => session,
        Err(e) => {
            return Err(session_failure(&state, "start", "Failed to start container", e).await);
        }
    };

    info!(session_id = %session.id, "Started session");
    Ok(Json(SessionResponse::new(&state, session)))
}

/// Restart a session's container.
#[instrument(skip(state, user, payload), fields(subject = %user.id()))]
pub async fn restart_session(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let id = session_request(payload)?;

    let session = match state.lifecycle.restart(&id).await {
        Ok(session) => session,
        Err(e) => {
            return Err(
                session_failure(&state, "restart", "Failed to restart container", e).await,
            );
        }
    };

    info!(session_id = %id, "Restarted session");
    Ok(Json(SessionResponse::new(&state, session)))
}

/// Stop a session's container and forget the session.
#[instrument(skip(state, user, payload), fields(subject = %user.id()))]
pub async fn terminate_session(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let id = session_request(payload)?;

    if let Err(e) = state.lifecycle.terminate(&id).await {
        return Err(
            session_failure(&state, "terminate", "Failed to terminate container", e).await,
        );
    }

    info!(session_id = %id, "Terminated session");
    Ok(Json(StatusResponse {
        status: STATUS_OK.to_string(),
        message: format!("Container {id} terminated."),
    }))
}

/// Remove a stopped session's container and volume.
#[instrument(skip(state, user, payload), fields(subject = %user.id()))]
pub async fn delete_session(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let id = session_request(payload)?;

    if let Err(e) = state.lifecycle.delete(&id).await {
        return Err(session_failure(&state, "delete", "Failed to delete container", e).await);
    }

    info!(session_id = %id, "Deleted session");
    Ok(Json(StatusResponse {
        status: STATUS_OK.to_string(),
        message: format!("Container {id} deleted."),
    }))
}

/// OpenAPI 3 description of the routes.
pub async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

/// Fallback for unmatched routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

fn openapi_document() -> Value {
    let uuid_body = json!({
        "required": true,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/SessionRequest" }
            }
        }
    });
    let error = |description: &str| {
        json!({
            "description": description,
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/Error" }
                }
            }
        })
    };
    let ok = |schema: &str| {
        json!({
            "description": "OK",
            "content": {
                "application/json": {
                    "schema": { "$ref": format!("#/components/schemas/{schema}") }
                }
            }
        })
    };

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "sessiond",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Container-backed session lifecycle API"
        },
        "security": [{ "bearerAuth": [] }],
        "paths": {
            "/api/start": {
                "post": {
                    "summary": "Start a new session",
                    "responses": {
                        "200": ok("SessionResponse"),
                        "401": error("Missing or invalid token"),
                        "500": error("Runtime failure")
                    }
                }
            },
            "/api/restart": {
                "post": {
                    "summary": "Restart a session's container",
                    "requestBody": uuid_body.clone(),
                    "responses": {
                        "200": ok("SessionResponse"),
                        "400": error("Invalid or unknown UUID"),
                        "401": error("Missing or invalid token"),
                        "500": error("Runtime failure")
                    }
                }
            },
            "/api/terminate": {
                "post": {
                    "summary": "Stop a session's container and unregister the session",
                    "requestBody": uuid_body.clone(),
                    "responses": {
                        "200": ok("StatusResponse"),
                        "400": error("Invalid or unknown UUID"),
                        "401": error("Missing or invalid token"),
                        "500": error("Runtime failure")
                    }
                }
            },
            "/api/delete": {
                "post": {
                    "summary": "Remove a stopped session's container and volume",
                    "requestBody": uuid_body,
                    "responses": {
                        "200": ok("StatusResponse"),
                        "400": error("Invalid or unknown UUID, or container still running"),
                        "401": error("Missing or invalid token"),
                        "500": error("Runtime failure")
                    }
                }
            },
            "/openapi.json": {
                "get": {
                    "summary": "This document",
                    "security": [],
                    "responses": { "200": { "description": "OpenAPI document" } }
                }
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            },
            "schemas": {
                "SessionRequest": {
                    "type": "object",
                    "required": ["uuid"],
                    "properties": { "uuid": { "type": "string", "format": "uuid" } }
                },
                "SessionResponse": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string" },
                        "uuid": { "type": "string", "format": "uuid" },
                        "container-id": { "type": "string" },
                        "stdio-url": { "type": "string" }
                    }
                },
                "StatusResponse": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string" },
                        "message": { "type": "string" }
                    }
                },
                "Error": {
                    "type": "object",
                    "properties": { "error": { "type": "string" } }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = openapi_document();
        let paths = doc["paths"].as_object().unwrap();
        for path in ["/api/start", "/api/restart", "/api/terminate", "/api/delete"] {
            assert!(paths[path]["post"].is_object(), "{path} missing");
        }
        assert!(paths["/openapi.json"]["get"].is_object());
        assert_eq!(doc["openapi"], "3.0.3");
    }

    #[test]
    fn test_session_response_uses_hyphenated_keys() {
        let body = serde_json::to_value(SessionResponse {
            status: "ok".to_string(),
            uuid: "u".to_string(),
            container_id: "c".to_string(),
            stdio_url: "ws://localhost:1/ws?uuid=u".to_string(),
        })
        .unwrap();
        assert_eq!(body["container-id"], "c");
        assert_eq!(body["stdio-url"], "ws://localhost:1/ws?uuid=u");
    }
}
