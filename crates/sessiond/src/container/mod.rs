//! Container runtime management module.
//!
//! Provides an async interface to manage session containers and volumes via
//! the Docker or Podman CLI. The runtime is auto-detected or can be
//! configured explicitly. Every CLI invocation is bounded by a timeout.

mod config;
mod error;

pub use config::{ContainerConfig, validate_image_name, validate_resource_name};
pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default upper bound for a single runtime CLI invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime (default for macOS dev)
    Docker,
    /// Podman runtime (default for Linux prod)
    #[default]
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// Container runtime abstraction used by the session lifecycle.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create a named volume.
    async fn create_volume(&self, name: &str) -> ContainerResult<()>;

    /// Remove a named volume.
    async fn remove_volume(&self, name: &str) -> ContainerResult<()>;

    /// Create and start a detached container, returning its ID.
    async fn run_container(&self, config: &ContainerConfig) -> ContainerResult<String>;

    async fn stop_container(
        &self,
        name: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;

    async fn start_container(&self, name: &str) -> ContainerResult<()>;

    async fn remove_container(&self, name: &str, force: bool) -> ContainerResult<()>;

    /// Container state string (e.g. "running", "exited"); `None` when the
    /// container does not exist.
    async fn container_state(&self, name: &str) -> ContainerResult<Option<String>>;
}

/// Container runtime client backed by the docker/podman CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// The runtime type (docker or podman)
    runtime_type: RuntimeType,
    /// Path to the container binary
    binary: String,
    /// Upper bound for each CLI invocation
    command_timeout: Duration,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Prefers Docker on macOS, Podman elsewhere, and falls back to whichever
    /// binary is on PATH.
    pub fn new() -> Self {
        #[cfg(target_os = "macos")]
        {
            if Self::is_binary_available("docker") {
                return Self::with_type(RuntimeType::Docker);
            }
        }

        if Self::is_binary_available("podman") {
            Self::with_type(RuntimeType::Podman)
        } else if Self::is_binary_available("docker") {
            Self::with_type(RuntimeType::Docker)
        } else {
            // Will fail at call time with a CommandFailed error
            Self::with_type(RuntimeType::Podman)
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Spawn the runtime binary and wait for it, bounded by the command timeout.
    async fn exec(&self, command: &str, args: &[&str]) -> ContainerResult<Output> {
        debug!(binary = %self.binary, ?args, "invoking container runtime");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ContainerError::Timeout {
                command: command.to_string(),
                seconds: self.command_timeout.as_secs(),
            }),
        }
    }

    /// Like [`exec`](Self::exec) but maps a non-zero exit to `CommandFailed`
    /// carrying stderr, and returns trimmed stdout.
    async fn exec_checked(&self, command: &str, args: &[&str]) -> ContainerResult<String> {
        let output = self.exec(command, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        self.exec_checked("version", &["version", "--format", "json"])
            .await
    }

    /// Check if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        validate_image_name(image)?;
        let output = self.exec("image inspect", &["image", "inspect", image]).await?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn create_volume(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name(name)?;
        self.exec_checked("volume create", &["volume", "create", name])
            .await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name(name)?;
        self.exec_checked("volume rm", &["volume", "rm", name]).await?;
        Ok(())
    }

    async fn run_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;

        let mut owned_args: Vec<String> = vec!["run".to_string(), "-d".to_string()];

        if let Some(ref name) = config.name {
            owned_args.push("--name".to_string());
            owned_args.push(name.clone());
        }

        for (volume, container_path) in &config.volumes {
            owned_args.push("-v".to_string());
            owned_args.push(format!("{}:{}", volume, container_path));
        }

        owned_args.push(config.image.clone());

        let args: Vec<&str> = owned_args.iter().map(String::as_str).collect();
        self.exec_checked("run", &args).await
    }

    async fn stop_container(
        &self,
        name: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        validate_resource_name(name)?;

        let timeout = timeout_seconds.map(|t| t.to_string());
        let mut args = vec!["stop"];
        if let Some(ref t) = timeout {
            args.push("-t");
            args.push(t);
        }
        args.push(name);

        self.exec_checked("stop", &args).await?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name(name)?;
        self.exec_checked("start", &["start", name]).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> ContainerResult<()> {
        validate_resource_name(name)?;

        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);

        self.exec_checked("rm", &args).await?;
        Ok(())
    }

    async fn container_state(&self, name: &str) -> ContainerResult<Option<String>> {
        validate_resource_name(name)?;

        let output = self
            .exec("inspect", &["inspect", "--format", "{{.State.Status}}", name])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_object(&stderr) {
                return Ok(None);
            }
            return Err(ContainerError::CommandFailed {
                command: "inspect".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let status = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_matches('"')
            .to_string();
        if status.is_empty() {
            return Ok(None);
        }

        Ok(Some(status))
    }
}

/// Whether runtime stderr reports that the inspected object does not exist.
///
/// docker: `Error: No such object: <name>` / `No such container: <name>`.
/// podman: `Error: no such object: "<name>"` / `no such container`.
fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}
