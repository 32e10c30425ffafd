//! HTTP API module.
//!
//! This module provides the dashboard server, its response types and the
//! log broadcaster shared by every layer of the crate.

pub mod server;
pub mod types;
pub mod logs;

pub use server::{router, start_server, AppState};
pub use types::*;
pub use logs::*;
