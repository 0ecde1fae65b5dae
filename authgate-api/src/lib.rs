//! API plumbing shared by the public and management listeners: error types
//! conforming to the HTTP status contract, response helpers, and the server
//! harness (bind + serve + graceful shutdown).

/// `ApiError` and the kind → status mapping.
pub mod error;
/// Binding and serving axum routers with graceful shutdown.
pub mod server;
