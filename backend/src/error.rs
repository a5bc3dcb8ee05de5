//! Error types for the billing report pipeline.
//!
//! One enum per layer, converted upward with `From` so `?` works across
//! boundaries:
//!
//! - [`UploadError`] - Rejected uploads (missing file, wrong extension, empty data)
//! - [`ReaderError`] - Spreadsheet / CSV decoding errors
//! - [`WriterError`] - Workbook serialization errors
//! - [`StoreError`] - Output store errors (IO, missing files, archives)
//! - [`PipelineError`] - Top-level orchestration errors
//! - [`ServerError`] - HTTP server errors
//!
//! Numeric coercion never produces an error: unparsable cost fields become
//! zero (see [`crate::transform::rules::parse_numeric_or_zero`]).

use axum::http::StatusCode;
use thiserror::Error;

// =============================================================================
// Upload Errors
// =============================================================================

/// Reasons an upload is rejected before any processing happens.
#[derive(Debug, Error)]
pub enum UploadError {
    /// No `file` field in the multipart body.
    #[error("No file uploaded")]
    MissingFile,

    /// File extension not accepted for this provider.
    #[error("Unsupported file type '{extension}', expected one of: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },

    /// The file parsed but contained no data rows.
    #[error("The file contains no data rows")]
    EmptyData,

    /// Body larger than the configured cap.
    #[error("File exceeds the upload limit of {limit} bytes")]
    TooLarge { limit: usize },
}

// =============================================================================
// Reader Errors
// =============================================================================

/// Errors while decoding uploaded bytes into records.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The workbook could not be opened or a sheet could not be read.
    #[error("Failed to read spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Malformed delimited text.
    #[error("Invalid CSV data: {0}")]
    Csv(#[from] csv::Error),

    /// The workbook has no worksheet.
    #[error("Workbook contains no sheets")]
    NoSheets,

    /// No header row found.
    #[error("No header row found")]
    NoHeaders,

    /// File extension has no matching reader.
    #[error("Unsupported input format '{0}'")]
    UnsupportedFormat(String),

    /// File read failure (CLI path).
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Writer Errors
// =============================================================================

/// Errors while serializing a group into a workbook.
#[derive(Debug, Error)]
pub enum WriterError {
    /// rust_xlsxwriter rejected a value or failed to assemble the file.
    #[error("Failed to build workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the output store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("Output store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested document does not exist.
    #[error("File not found: {0}")]
    NotFound(String),

    /// File name contains path components.
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    /// Archive requested but nothing matched.
    #[error("No files available for download")]
    Empty,

    /// Archive assembly failed.
    #[error("Failed to build archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl StoreError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) | StoreError::Empty => StatusCode::NOT_FOUND,
            StoreError::InvalidName(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Zip(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors returned by [`crate::transform::pipeline::process_upload`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upload rejected.
    #[error("{0}")]
    Upload(#[from] UploadError),

    /// Input could not be decoded.
    #[error("Parse error: {0}")]
    Reader(#[from] ReaderError),

    /// Workbook could not be written.
    #[error("Write error: {0}")]
    Writer(#[from] WriterError),

    /// Output store failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Rules file could not be loaded.
    #[error("Invalid rules: {0}")]
    Rules(#[from] serde_json::Error),
}

impl PipelineError {
    /// HTTP status this error maps to.
    ///
    /// Upload problems are the caller's fault (4xx); everything past
    /// validation is a server-side failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::Upload(_) => StatusCode::BAD_REQUEST,
            PipelineError::Store(e) => e.status_code(),
            PipelineError::Reader(_) | PipelineError::Writer(_) | PipelineError::Rules(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound or the server loop failed.
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output directories could not be prepared.
    #[error("Storage setup failed: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for reader operations.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Result type for writer operations.
pub type WriterResult<T> = Result<T, WriterError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
