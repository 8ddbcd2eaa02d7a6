//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::error_log::ErrorLog;
use crate::session::SessionLifecycle;

/// Where clients attach to a session's stdio stream.
#[derive(Debug, Clone)]
pub struct StdioEndpoint {
    pub host: String,
    pub port: u16,
}

impl StdioEndpoint {
    pub fn url(&self, id: &str) -> String {
        format!("ws://{}:{}/ws?uuid={}", self.host, self.port, id)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<SessionLifecycle>,
    pub auth: AuthState,
    pub error_log: Arc<ErrorLog>,
    pub stdio: StdioEndpoint,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<SessionLifecycle>,
        auth: AuthState,
        error_log: Arc<ErrorLog>,
        stdio: StdioEndpoint,
    ) -> Self {
        Self {
            lifecycle,
            auth,
            error_log,
            stdio,
        }
    }
}
