//! Session state machine driven against the container runtime.
//!
//! ```text
//! Unknown --create--> Running --terminate--> Stopped --delete--> Removed
//!                        ^  \                   |
//!                        +---restart------------+
//! ```

use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::{SessionError, SessionResult};
use super::registry::SessionRegistry;
use crate::container::{ContainerConfig, ContainerRuntimeApi};

pub const MSG_STARTED: &str = "Container started";
pub const MSG_RESTARTED: &str = "Container restarted";
pub const MSG_TERMINATED: &str = "Container terminated";

/// Volume backing session `id`.
pub fn volume_name(id: &str) -> String {
    format!("{id}-vol")
}

/// Container backing session `id`.
pub fn container_name(id: &str) -> String {
    format!("container-{id}")
}

/// What every session container is created from.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub image: String,
    /// Mount point of the session volume inside the container.
    pub volume_mount: String,
    /// Grace period passed to `stop -t`; runtime default when `None`.
    pub stop_timeout_secs: Option<u32>,
}

/// A session that is running after create or restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningSession {
    pub id: String,
    pub container_id: String,
}

pub struct SessionLifecycle {
    runtime: Arc<dyn ContainerRuntimeApi>,
    registry: SessionRegistry,
    config: LifecycleConfig,
}

impl SessionLifecycle {
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        registry: SessionRegistry,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Provision a volume and container for a fresh id and register it.
    ///
    /// All or nothing: on any failure the volume, container and transcript
    /// created so far are torn down and nothing is registered.
    #[instrument(skip(self))]
    pub async fn create(&self) -> SessionResult<RunningSession> {
        let id = Uuid::new_v4().to_string();
        let _guard = self.registry.lock(&id).await;

        let result = self.provision(&id).await;
        if result.is_err() {
            self.registry.retire(&id);
        }
        result
    }

    async fn provision(&self, id: &str) -> SessionResult<RunningSession> {
        let volume = volume_name(id);
        let name = container_name(id);

        self.runtime.create_volume(&volume).await?;

        let container = ContainerConfig::new(&self.config.image)
            .name(&name)
            .volume(&volume, &self.config.volume_mount);

        let container_id = match self.runtime.run_container(&container).await {
            Ok(container_id) => container_id,
            Err(e) => {
                self.rollback(id, &name, &volume).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.registry.log().append(id, MSG_STARTED).await {
            self.rollback(id, &name, &volume).await;
            return Err(e.into());
        }

        info!(session_id = %id, container_id = %container_id, "session started");
        Ok(RunningSession {
            id: id.to_string(),
            container_id,
        })
    }

    /// Best-effort teardown of a half-created session.
    async fn rollback(&self, id: &str, name: &str, volume: &str) {
        warn!(session_id = %id, "rolling back failed session create");

        // `run -d` can leave a created container behind even when it fails.
        if let Ok(Some(_)) = self.runtime.container_state(name).await
            && let Err(e) = self.runtime.remove_container(name, true).await
        {
            warn!(session_id = %id, "rollback: failed to remove container: {}", e);
        }
        if let Err(e) = self.runtime.remove_volume(volume).await {
            warn!(session_id = %id, "rollback: failed to remove volume: {}", e);
        }
        if let Err(e) = self.registry.log().remove(id).await {
            warn!(session_id = %id, "rollback: failed to remove transcript: {}", e);
        }
    }

    /// Stop then start the session's container. Both steps must succeed.
    #[instrument(skip(self))]
    pub async fn restart(&self, id: &str) -> SessionResult<RunningSession> {
        let _guard = self.lock_registered(id).await?;

        let name = container_name(id);
        self.runtime
            .stop_container(&name, self.config.stop_timeout_secs)
            .await?;
        self.runtime.start_container(&name).await?;
        self.registry.log().append(id, MSG_RESTARTED).await?;

        info!(session_id = %id, "session restarted");
        Ok(RunningSession {
            id: id.to_string(),
            container_id: name,
        })
    }

    /// Stop the container and unregister the session.
    ///
    /// The container and volume stay on disk until [`Self::delete`].
    #[instrument(skip(self))]
    pub async fn terminate(&self, id: &str) -> SessionResult<()> {
        let guard = self.lock_registered(id).await?;

        self.runtime
            .stop_container(&container_name(id), self.config.stop_timeout_secs)
            .await?;
        self.registry.log().append(id, MSG_TERMINATED).await?;
        self.registry.log().remove(id).await?;

        drop(guard);
        self.registry.retire(id);
        info!(session_id = %id, "session terminated");
        Ok(())
    }

    /// Remove the container, its volume and any residual transcript.
    ///
    /// Refuses with [`SessionError::StillRunning`] while the container runs.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> SessionResult<()> {
        let guard = self.lock_registered(id).await?;

        let name = container_name(id);
        match self.runtime.container_state(&name).await? {
            Some(state) if state == "running" => {
                return Err(SessionError::StillRunning(id.to_string()));
            }
            Some(state) => {
                debug!(session_id = %id, state = %state, "removing container");
                self.runtime.remove_container(&name, false).await?;
            }
            None => debug!(session_id = %id, "container already gone"),
        }

        self.runtime.remove_volume(&volume_name(id)).await?;
        self.registry.log().remove(id).await?;

        drop(guard);
        self.registry.retire(id);
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Take the transition lock of a registered session.
    ///
    /// Unknown ids are rejected before a lock slot is allocated for them.
    /// Registration is checked again under the lock, since a concurrent
    /// terminate or delete may have won the race.
    async fn lock_registered(&self, id: &str) -> SessionResult<OwnedMutexGuard<()>> {
        if !self.registry.contains(id) {
            return Err(SessionError::UnknownSession(id.to_string()));
        }

        let guard = self.registry.lock(id).await;
        if !self.registry.contains(id) {
            drop(guard);
            self.registry.retire(id);
            return Err(SessionError::UnknownSession(id.to_string()));
        }
        Ok(guard)
    }
}
