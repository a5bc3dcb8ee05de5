//! REST API response types.
//!
//! Field names are camelCase to match what the upload page expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::Provider;
use crate::store::StoredFile;
use crate::transform::pipeline::{ProcessOutcome, SavedFile};

/// Response sent after an upload was split into per-group workbooks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub success: bool,
    /// Unique id of this upload, echoed in the logs
    pub job_id: String,
    pub message: String,
    pub files: Vec<SavedFile>,
    pub summary: ProcessSummary,
}

/// Totals over all files written for one upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub groups: usize,
    pub total_records: usize,
    pub dropped_records: usize,
    pub total_amount: f64,
}

impl ProcessResponse {
    pub fn new(job_id: Uuid, outcome: ProcessOutcome) -> Self {
        let message = format!(
            "{} report processed, {} file(s) generated",
            outcome.provider.display_name(),
            outcome.files.len()
        );
        Self {
            success: true,
            job_id: job_id.to_string(),
            message,
            summary: ProcessSummary {
                groups: outcome.files.len(),
                total_records: outcome.total_records,
                dropped_records: outcome.dropped_records,
                total_amount: outcome.total_amount,
            },
            files: outcome.files,
        }
    }
}

/// One stored document in the listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub provider: Provider,
    /// Download URL
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl FileEntry {
    pub fn new(provider: Provider, file: StoredFile) -> Self {
        Self {
            path: download_path(provider, &file.name),
            name: file.name,
            provider,
            size: file.size,
            created_at: file.created_at,
        }
    }
}

/// Files per provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderFiles {
    pub azure: Vec<FileEntry>,
    pub tencent: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListSummary {
    pub total_files: usize,
    pub azure_count: usize,
    pub tencent_count: usize,
}

/// Response of the file listing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub success: bool,
    pub files: ProviderFiles,
    pub summary: FileListSummary,
}

impl FileListResponse {
    pub fn new(files: ProviderFiles) -> Self {
        let summary = FileListSummary {
            total_files: files.azure.len() + files.tencent.len(),
            azure_count: files.azure.len(),
            tencent_count: files.tencent.len(),
        };
        Self {
            success: true,
            files,
            summary,
        }
    }
}

/// URL a stored document can be downloaded from.
pub fn download_path(provider: Provider, file_name: &str) -> String {
    format!("/api/download/{}/{}", provider.as_str(), percent_encode(file_name))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// `Content-Disposition` value that survives non-ASCII file names.
pub fn attachment_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(file_name)
    )
}

/// Create an error response
pub fn error_response(message: &str) -> Value {
    json!({
        "success": false,
        "message": message,
    })
}
