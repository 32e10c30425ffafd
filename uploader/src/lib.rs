//! # Listload - chunked bulk upload of contact lists
//!
//! Listload takes a text file of phone-number records (hundreds of thousands
//! of lines), splits it into chunks small enough for the ingestion endpoint to
//! answer within its timeout, and uploads them one at a time while keeping a
//! running tally of valid, invalid and duplicate contacts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  .txt/.csv  │────▶│   Reader    │────▶│ Chunk Plan  │────▶│ Orchestrator│──▶ POST /contacts/upload
//! │  (any enc)  │     │ + Preview   │     │ (size tier) │     │ (sequential)│
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                    ▼
//!                                                             ┌─────────────┐
//!                                                             │ Aggregator  │──▶ progress / summary
//!                                                             └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use listload::{HttpIngestClient, Orchestrator, RawFile, UploadJob, UploadParams, UploaderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UploaderConfig::from_env()?;
//!     let orchestrator = Orchestrator::new(HttpIngestClient::new(&config)?, &config);
//!
//!     let mut job = UploadJob::new(RawFile::open("contatos.txt").await?);
//!     job.prepare()?;
//!     let summary = job
//!         .upload(&orchestrator, &UploadParams::default(), &CancellationToken::new())
//!         .await?;
//!     println!("{}", summary.status_message);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`config`] - Endpoint and pacing configuration
//! - [`reader`] - File decoding and line splitting
//! - [`preview`] - Separator detection and sample rows
//! - [`plan`] - Chunk size tiers and partitioning
//! - [`client`] - Ingestion endpoint client
//! - [`upload`] - Sequential orchestrator and retry policy
//! - [`aggregate`] - Running totals and progress
//! - [`job`] - Upload job state machine
//! - [`api`] - Dashboard HTTP server and logs

// Core modules
pub mod error;
pub mod config;

// Input
pub mod reader;
pub mod preview;

// Upload pipeline
pub mod plan;
pub mod client;
pub mod upload;
pub mod aggregate;
pub mod job;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ChunkTransportError,
    ConfigError,
    JobError,
    ParseError,
    ServerError,
    ParseResult,
    TransportResult,
    ConfigResult,
    JobResult,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::UploaderConfig;

// =============================================================================
// Re-exports - Reader & Preview
// =============================================================================

pub use reader::{
    read_lines,
    read_path,
    detect_encoding,
    decode_content,
    FilePurpose,
    LineSet,
    RawFile,
};

pub use preview::{
    build_preview,
    detect_separator,
    preview_file,
    Preview,
    Separator,
};

// =============================================================================
// Re-exports - Chunk planning
// =============================================================================

pub use plan::{chunk_size_for, plan_chunks, Chunk, ChunkPlan, PlanSummary};

// =============================================================================
// Re-exports - Client
// =============================================================================

pub use client::{
    ChunkRequest,
    HttpIngestClient,
    IngestClient,
    IngestCounts,
    UploadParams,
};

// =============================================================================
// Re-exports - Upload & aggregation
// =============================================================================

pub use upload::{Orchestrator, RetryPolicy};

pub use aggregate::{
    Aggregator,
    ChunkOutcome,
    JobState,
    Progress,
    UploadSummary,
};

pub use job::{JobSnapshot, UploadJob};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
