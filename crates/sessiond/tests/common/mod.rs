//! Test utilities and common setup.

use async_trait::async_trait;
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use sessiond::api::{self, AppState, StdioEndpoint};
use sessiond::auth::{AuthConfig, AuthState};
use sessiond::container::{ContainerConfig, ContainerError, ContainerResult, ContainerRuntimeApi};
use sessiond::error_log::ErrorLog;
use sessiond::session::{LifecycleConfig, SessionLifecycle, SessionLog, SessionRegistry};

pub const TEST_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";
pub const TEST_PORT: u16 = 8080;

/// In-memory container runtime. Operations named in `fail_on` return a
/// runtime failure.
#[derive(Default)]
pub struct FakeRuntime {
    pub volumes: Mutex<HashSet<String>>,
    pub containers: Mutex<HashMap<String, String>>,
    pub fail_on: Mutex<HashSet<&'static str>>,
}

impl FakeRuntime {
    pub fn fail(&self, op: &'static str) {
        self.fail_on.lock().unwrap().insert(op);
    }

    pub fn set_state(&self, name: &str, state: &str) {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), state.to_string());
    }

    fn check(&self, op: &'static str) -> ContainerResult<()> {
        if self.fail_on.lock().unwrap().contains(op) {
            return Err(ContainerError::CommandFailed {
                command: op.to_string(),
                message: format!("secret stderr from {op}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeRuntime {
    async fn create_volume(&self, name: &str) -> ContainerResult<()> {
        self.check("volume create")?;
        self.volumes.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> ContainerResult<()> {
        self.check("volume rm")?;
        self.volumes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn run_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.check("run")?;
        let name = config.name.clone().unwrap_or_default();
        self.set_state(&name, "running");
        Ok(format!("id-{name}"))
    }

    async fn stop_container(&self, name: &str, _timeout: Option<u32>) -> ContainerResult<()> {
        self.check("stop")?;
        self.set_state(name, "exited");
        Ok(())
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        self.check("start")?;
        self.set_state(name, "running");
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> ContainerResult<()> {
        self.check("rm")?;
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn container_state(&self, name: &str) -> ContainerResult<Option<String>> {
        self.check("inspect")?;
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }
}

/// A router wired to a fake runtime and a temporary sessions directory.
pub struct TestApp {
    pub router: Router,
    pub token: String,
    pub runtime: Arc<FakeRuntime>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub error_log: PathBuf,
    pub dir: TempDir,
}

impl TestApp {
    pub fn transcript_path(&self, id: &str) -> PathBuf {
        self.dir
            .path()
            .join("sessions")
            .join(format!("{id}_stdio.xml"))
    }
}

pub fn auth_state() -> AuthState {
    AuthState::new(AuthConfig::with_secret(TEST_SECRET))
}

/// Create a test application and a valid token for it.
pub fn test_app_with_token() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::default());

    let log = Arc::new(SessionLog::new(dir.path().join("sessions")));
    std::fs::create_dir_all(log.dir()).unwrap();

    let lifecycle = Arc::new(SessionLifecycle::new(
        runtime.clone(),
        SessionRegistry::new(log),
        LifecycleConfig {
            image: "alpine:3.20".to_string(),
            volume_mount: "/workspace".to_string(),
            stop_timeout_secs: Some(1),
        },
    ));

    let error_log = dir.path().join("error.log");
    let auth = auth_state();
    let token = auth.generate_token("tester", None).unwrap();

    let state = AppState::new(
        lifecycle.clone(),
        auth,
        Arc::new(ErrorLog::new(&error_log)),
        StdioEndpoint {
            host: "localhost".to_string(),
            port: TEST_PORT,
        },
    );

    TestApp {
        router: api::create_router(state),
        token,
        runtime,
        lifecycle,
        error_log,
        dir,
    }
}
