//! HTTP server for the evidence retrieval engine

pub mod auth;
pub mod error;
pub mod http;
pub mod metrics;
pub mod state;

pub use error::ErrorResponse;
pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;
