//! Session management.
//!
//! A session is one container plus its volume and stdio transcript, keyed by
//! a v4 UUID. [`SessionLifecycle`] drives the transitions, [`SessionRegistry`]
//! tracks which ids exist and [`SessionLog`] persists the transcripts.

mod error;
mod lifecycle;
mod log;
mod registry;

pub use error::{SessionError, SessionResult};
pub use lifecycle::{
    LifecycleConfig, MSG_RESTARTED, MSG_STARTED, MSG_TERMINATED, RunningSession,
    SessionLifecycle, container_name, volume_name,
};
pub use log::{LogEntry, LogError, SessionLog, escape, parse_transcript, unescape};
pub use registry::SessionRegistry;
