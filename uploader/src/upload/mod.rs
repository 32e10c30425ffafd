//! Sequential, paced chunk upload.
//!
//! - [`orchestrator`] - dispatches a chunk plan one request at a time
//! - [`retry`] - bounded exponential backoff for failed chunks

pub mod orchestrator;
pub mod retry;

pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
