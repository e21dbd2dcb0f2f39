//! HTTP surface of the analysis service.
//!
//! `api_router()` returns a composable `Router` with `POST /analyze` and
//! `GET /health`; `server` owns the listener lifecycle.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
