//! Small utilities on top of Tokio: named tasks and a shutdown channel.

/// `ShutdownChannel`, the process-wide shutdown signal.
pub mod shutdown;
/// `NamedTask` and helpers for joining tasks at shutdown.
pub mod task;

// Can save a `tokio` dependency declaration
pub use tokio;
