//! Authentication module.
//!
//! Bearer-token gate applied to every API route: HS256 signature
//! verification followed by the `sub`/`exp` claim checks.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError, MIN_SECRET_LEN};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
