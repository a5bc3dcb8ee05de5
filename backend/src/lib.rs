//! # Billreport - split cloud billing exports into per-customer workbooks
//!
//! Billreport takes a monthly billing export from Azure (xlsx) or Tencent
//! Cloud (xlsx/csv), drops rows that cannot be attributed, reshapes columns,
//! computes line totals and writes one xlsx workbook per customer/account.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Upload    │────▶│   Parser    │────▶│  Transform  │────▶│   Writer    │
//! │ (xlsx/csv)  │     │  (auto-enc) │     │ (rules+group)│    │ (per group) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                   ▼
//!                                                            ┌─────────────┐
//!                                                            │ OutputStore │
//!                                                            │ (list, zip) │
//!                                                            └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use billreport::{process_file, FsOutputStore, Provider, RuleSet};
//!
//! let store = FsOutputStore::open("output")?;
//! let rules = RuleSet::builtin();
//! let today = chrono::Local::now().date_naive();
//! let outcome = process_file(
//!     Provider::Tencent,
//!     "bill.csv".as_ref(),
//!     rules.get(Provider::Tencent),
//!     &store,
//!     today,
//! )?;
//! println!("Wrote {} workbooks", outcome.files.len());
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Environment-driven server configuration
//! - [`error`] - Layered error types
//! - [`models`] - Provider, records and groups
//! - [`parser`] - xlsx and CSV decoding with auto-detection
//! - [`transform`] - Provider rules, grouping and the pipeline
//! - [`writer`] - Workbook rendering
//! - [`store`] - Output directory, listing and zip archives
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Reading
pub mod parser;

// Transformation
pub mod transform;

// Output
pub mod store;
pub mod writer;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    PipelineError, ReaderError, ServerError, StoreError, UploadError, WriterError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Group, GroupedReport, Provider, Record};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes, parse_file, ParseResult,
    SourceFormat,
};

// =============================================================================
// Re-exports - Rules and pipeline
// =============================================================================

pub use transform::rules::{ProviderRules, RuleSet};
pub use transform::{group_records, process_file, process_upload, ProcessOutcome, SavedFile};

// =============================================================================
// Re-exports - Output
// =============================================================================

pub use store::{ArchiveSelector, FsOutputStore, OutputStore, StoredFile};
pub use writer::{output_file_name, render_group, OutputDocument};

// Server
pub mod server {
    pub use crate::api::server::start_server;
    pub use crate::config::ServerConfig;
}
