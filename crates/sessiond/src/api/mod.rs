//! HTTP API.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse, UNKNOWN_UUID};
pub use handlers::{SessionRequest, SessionResponse, StatusResponse};
pub use routes::create_router;
pub use state::{AppState, StdioEndpoint};
