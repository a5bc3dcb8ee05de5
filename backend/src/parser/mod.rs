//! Tabular reader: xlsx workbooks and delimited text into ordered records.
//!
//! Only the first worksheet of a workbook is read. The first row is the
//! header; every record carries the full header set, with empty cells stored
//! as `null`. Nothing provider-specific happens here.

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::Path;

use crate::error::{ReaderError, ReaderResult};
use crate::models::Record;

/// Declared format of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Xlsx,
    Csv,
}

impl SourceFormat {
    /// Guess the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match file_extension(name).as_str() {
            ".xlsx" | ".xlsm" | ".xls" => Some(SourceFormat::Xlsx),
            ".csv" => Some(SourceFormat::Csv),
            _ => None,
        }
    }
}

/// Lowercased extension including the dot, or an empty string.
pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Result of parsing with metadata
#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    /// Parsed records in input order
    pub records: Vec<Record>,
    /// Column headers
    pub headers: Vec<String>,
    /// Format the bytes were decoded as
    pub format: SourceFormat,
    /// Detected text encoding (CSV only)
    pub encoding: Option<String>,
    /// Detected delimiter (CSV only)
    pub delimiter: Option<char>,
}

/// Parse raw bytes declared as `format`.
pub fn parse_bytes(bytes: &[u8], format: SourceFormat) -> ReaderResult<ParseResult> {
    match format {
        SourceFormat::Xlsx => parse_xlsx(bytes),
        SourceFormat::Csv => parse_csv_auto(bytes),
    }
}

/// Read a file from disk and parse it according to its extension.
pub fn parse_file<P: AsRef<Path>>(path: P) -> ReaderResult<ParseResult> {
    let path = path.as_ref();
    let name = path.to_string_lossy();
    let format = SourceFormat::from_file_name(&name)
        .ok_or_else(|| ReaderError::UnsupportedFormat(file_extension(&name)))?;
    let bytes = std::fs::read(path)?;
    parse_bytes(&bytes, format)
}

// =============================================================================
// Spreadsheets
// =============================================================================

/// Parse the first worksheet of a workbook.
pub fn parse_xlsx(bytes: &[u8]) -> ReaderResult<ParseResult> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ReaderError::NoSheets)??;

    let (headers, records) = range_to_records(&range)?;

    Ok(ParseResult {
        records,
        headers,
        format: SourceFormat::Xlsx,
        encoding: None,
        delimiter: None,
    })
}

fn range_to_records(range: &Range<Data>) -> ReaderResult<(Vec<String>, Vec<Record>)> {
    let mut rows = range.rows();

    let header_row = rows.next().ok_or(ReaderError::NoHeaders)?;
    let headers = header_names(header_row.iter().map(cell_to_header));
    if headers.is_empty() {
        return Err(ReaderError::NoHeaders);
    }

    let mut records = Vec::new();
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }

        let mut record = Record::new();
        for (i, header) in headers.iter().enumerate() {
            let value = row.get(i).map(cell_to_value).unwrap_or(Value::Null);
            record.insert(header.clone(), value);
        }
        records.push(record);
    }

    Ok((headers, records))
}

fn cell_to_header(cell: &Data) -> String {
    match cell_to_value(cell) {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert one cell into a JSON value.
///
/// Integral floats become integers so ids and quantities keep their
/// spreadsheet appearance.
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                json!(trimmed)
            }
        }
        Data::Int(i) => json!(i),
        Data::Float(f) => number_value(*f),
        Data::Bool(b) => json!(b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) if naive.time() == chrono::NaiveTime::MIN => {
                json!(naive.date().format("%Y-%m-%d").to_string())
            }
            Some(naive) => json!(naive.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => number_value(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => json!(s),
        Data::Error(e) => json!(e.to_string()),
    }
}

/// JSON number for a float, as an integer when it has no fractional part.
pub fn number_value(f: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_SAFE {
        json!(f as i64)
    } else {
        json!(f)
    }
}

/// Blank headers get a positional name; duplicates get a numeric suffix.
fn header_names(raw: impl Iterator<Item = String>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for (i, name) in raw.enumerate() {
        let name = name.trim();
        let base = if name.is_empty() {
            format!("__EMPTY_{}", i)
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while headers.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        headers.push(candidate);
    }

    // Trailing unnamed columns carry no data worth keeping
    while headers.last().is_some_and(|h| h.starts_with("__EMPTY_")) {
        headers.pop();
    }
    headers
}

// =============================================================================
// Delimited text
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return "utf-8".to_string();
    }

    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        "gb2312" | "gbk" | "gb18030" => "gbk".to_string(),
        _ => charset.to_lowercase(),
    }
}

/// Decode bytes to string using the specified encoding.
///
/// Unknown labels fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        label => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_csv_auto(bytes: &[u8]) -> ReaderResult<ParseResult> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);

    let (headers, records) = parse_csv_str(&content, delimiter)?;

    Ok(ParseResult {
        records,
        headers,
        format: SourceFormat::Csv,
        encoding: Some(encoding),
        delimiter: Some(delimiter),
    })
}

/// Parse CSV text with an explicit delimiter.
pub fn parse_csv_str(content: &str, delimiter: char) -> ReaderResult<(Vec<String>, Vec<Record>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers = header_names(reader.headers()?.iter().map(str::to_string));
    if headers.is_empty() {
        return Err(ReaderError::NoHeaders);
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        let mut record = Record::new();
        for (i, header) in headers.iter().enumerate() {
            let value = match row.get(i).map(str::trim) {
                Some(v) if !v.is_empty() => json!(v),
                _ => Value::Null,
            };
            record.insert(header.clone(), value);
        }
        records.push(record);
    }

    Ok((headers, records))
}
