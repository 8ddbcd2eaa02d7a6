//! Container-backed session lifecycle server.
//!
//! Provisions, restarts, terminates and deletes sessions (one docker/podman
//! container plus a volume each), records every session's stdio transcript
//! to disk, and serves it all behind a bearer-token gated HTTP API.

pub mod api;
pub mod auth;
pub mod container;
pub mod error_log;
pub mod session;
