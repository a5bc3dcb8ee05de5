//! High-level pipeline: upload bytes in, one stored workbook per group out.
//!
//! ```text
//! bytes ─▶ validate_upload ─▶ parse_bytes ─▶ group_records ─▶ render_group ─▶ OutputStore::put
//!                                                              (per group)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use billreport::{process_upload, FsOutputStore, Provider, RuleSet};
//!
//! let store = FsOutputStore::open("output")?;
//! let bytes = std::fs::read("invoice.xlsx")?;
//! let rules = RuleSet::builtin();
//! let today = chrono::Local::now().date_naive();
//! let outcome = process_upload(Provider::Azure, "invoice.xlsx", &bytes, rules.get(Provider::Azure), &store, today)?;
//! println!("Wrote {} files", outcome.files.len());
//! ```
//!
//! A write failure part-way through the group loop aborts the upload; files
//! already written for earlier groups stay in the store.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use super::grouper::group_records;
use super::rules::ProviderRules;
use crate::api::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::error::{PipelineError, UploadError};
use crate::models::{GroupedReport, Provider, Record};
use crate::parser::{file_extension, parse_bytes, ParseResult, SourceFormat};
use crate::store::OutputStore;
use crate::writer::{numbered_file_name, render_group};

/// One workbook written for an upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub name: String,
    pub key: String,
    pub record_count: usize,
    pub total: f64,
    pub size: u64,
}

/// Input file information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub file_name: String,
    pub format: SourceFormat,
    pub encoding: Option<String>,
    pub delimiter: Option<char>,
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// Result of processing one upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub provider: Provider,
    pub files: Vec<SavedFile>,
    pub source: SourceInfo,
    /// Rows that reached an output file
    pub total_records: usize,
    /// Rows removed by the provider filters
    pub dropped_records: usize,
    /// Sum of all group totals
    pub total_amount: f64,
}

/// Check the declared file name against the provider's accepted extensions.
pub fn validate_upload(
    provider: Provider,
    file_name: Option<&str>,
    byte_len: usize,
    max_bytes: usize,
) -> Result<SourceFormat, UploadError> {
    let file_name = file_name.ok_or(UploadError::MissingFile)?;
    if byte_len > max_bytes {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }

    let extension = file_extension(file_name);
    let allowed = provider.allowed_extensions();
    if !allowed.contains(&extension.as_str()) {
        return Err(UploadError::UnsupportedExtension {
            extension,
            allowed: allowed.join(", "),
        });
    }

    SourceFormat::from_file_name(file_name).ok_or(UploadError::UnsupportedExtension {
        extension: file_extension(file_name),
        allowed: allowed.join(", "),
    })
}

/// Apply `rules` to parsed records, logging a short summary.
pub fn transform_records(records: Vec<Record>, rules: &ProviderRules) -> GroupedReport {
    log_info(format!("⚙️  Applying {} rules...", rules.provider.display_name()));
    let report = group_records(records, rules);

    log_success(format!(
        "{} rows kept in {} group(s)",
        report.kept_rows(),
        report.len()
    ));
    if report.dropped_rows > 0 {
        log_warning(format!(
            "{} rows dropped (missing {} or excluded)",
            report.dropped_rows,
            rules.required_keys.join(" / ")
        ));
    }
    report
}

/// Parse, transform and store one uploaded document.
pub fn process_upload(
    provider: Provider,
    file_name: &str,
    bytes: &[u8],
    rules: &ProviderRules,
    store: &dyn OutputStore,
    today: NaiveDate,
) -> Result<ProcessOutcome, PipelineError> {
    let format = validate_upload(provider, Some(file_name), bytes.len(), usize::MAX)?;

    log_info(format!("📖 Reading {} ({} bytes)...", file_name, bytes.len()));
    let parsed = parse_bytes(bytes, format)?;
    log_parse_result(&parsed);

    if parsed.records.is_empty() {
        return Err(UploadError::EmptyData.into());
    }

    let source = SourceInfo {
        file_name: file_name.to_string(),
        format: parsed.format,
        encoding: parsed.encoding.clone(),
        delimiter: parsed.delimiter,
        headers: parsed.headers.clone(),
        row_count: parsed.records.len(),
    };

    let report = transform_records(parsed.records, rules);
    let files = write_report(&report, rules, store, today)?;

    Ok(ProcessOutcome {
        provider,
        source,
        total_records: report.kept_rows(),
        dropped_records: report.dropped_rows,
        total_amount: report.grand_total(),
        files,
    })
}

/// Read a file from disk and run [`process_upload`] on it.
pub fn process_file(
    provider: Provider,
    path: &Path,
    rules: &ProviderRules,
    store: &dyn OutputStore,
    today: NaiveDate,
) -> Result<ProcessOutcome, PipelineError> {
    let bytes = std::fs::read(path).map_err(crate::error::ReaderError::Io)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    process_upload(provider, &file_name, &bytes, rules, store, today)
}

/// Render and store every group of `report`, in group order.
pub fn write_report(
    report: &GroupedReport,
    rules: &ProviderRules,
    store: &dyn OutputStore,
    today: NaiveDate,
) -> Result<Vec<SavedFile>, PipelineError> {
    log_info(format!("💾 Writing {} workbook(s)...", report.len()));

    let mut saved = Vec::with_capacity(report.len());
    let mut used_names: HashSet<String> = HashSet::with_capacity(report.len());
    for group in &report.groups {
        let mut doc = render_group(group, rules, today)?;

        // Distinct keys can sanitize to one name (`A/B`, `A:B`)
        if used_names.contains(&doc.file_name) {
            let base = doc.file_name.clone();
            let mut n = 2;
            while used_names.contains(&numbered_file_name(&base, n)) {
                n += 1;
            }
            doc.file_name = numbered_file_name(&base, n);
            log_warning(format!(
                "Key '{}' collides with an earlier group, writing {}",
                doc.key, doc.file_name
            ));
        }
        used_names.insert(doc.file_name.clone());

        let stored = store.put(rules.provider, &doc.file_name, &doc.bytes)?;
        log_info_indent(
            format!("{} ({} rows, total {:.2})", doc.file_name, doc.record_count, doc.total),
            1,
        );
        saved.push(SavedFile {
            name: stored.name,
            key: doc.key,
            record_count: doc.record_count,
            total: doc.total,
            size: stored.size,
        });
    }

    log_success(format!("{} file(s) written", saved.len()));
    Ok(saved)
}

fn log_parse_result(parsed: &ParseResult) {
    if let Some(ref encoding) = parsed.encoding {
        log_success(format!("Detected encoding: {}", encoding));
    }
    if let Some(delimiter) = parsed.delimiter {
        log_success(format!("Detected separator: '{}'", format_delimiter(delimiter)));
    }
    log_success(format!(
        "Read {} rows, {} columns",
        parsed.records.len(),
        parsed.headers.len()
    ));
}

/// Format delimiter for display
fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "TAB".to_string(),
        c => c.to_string(),
    }
}
