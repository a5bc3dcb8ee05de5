//! Workbook writer: one xlsx document per group.
//!
//! Layout of the single sheet:
//!
//! ```text
//! row 0      header (field names, first-seen order, bold, frozen)
//! row 1..=n  one row per record
//! row n+1    blank                      (summary only)
//! row n+2    "Total" ... <group total>  (summary only)
//! ```
//!
//! The sheet is named after the previous calendar month (`Sep_2026`), the
//! billing period the export normally covers.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde_json::Value;

use crate::error::WriterResult;
use crate::models::Group;
use crate::transform::rules::ProviderRules;

/// Label written in the group-key column of the summary row.
pub const SUMMARY_LABEL: &str = "Total";

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1F]"#).expect("valid regex"));

/// A rendered workbook ready for the output store.
#[derive(Debug, Clone)]
pub struct OutputDocument {
    pub file_name: String,
    pub key: String,
    pub record_count: usize,
    pub total: f64,
    pub bytes: Vec<u8>,
}

/// Sheet label for the month before `today`, e.g. `Sep_2026`.
pub fn sheet_label(today: NaiveDate) -> String {
    let last_of_previous = today - Duration::days(i64::from(today.day()));
    last_of_previous.format("%b_%Y").to_string()
}

/// Make a group key safe to use inside a file name.
pub fn sanitize_file_component(raw: &str) -> String {
    let replaced = UNSAFE_FILE_CHARS.replace_all(raw, "_");
    let trimmed = replaced.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<prefix><key>_<YYYY-MM-DD>.xlsx`. Same key on the same day gives the same
/// name, so a re-upload replaces that day's file.
pub fn output_file_name(rules: &ProviderRules, key: &str, today: NaiveDate) -> String {
    format!(
        "{}{}_{}.xlsx",
        rules.file_prefix,
        sanitize_file_component(key),
        today.format("%Y-%m-%d")
    )
}

/// `name_2026-10-19.xlsx` with `n = 2` gives `name_2026-10-19_2.xlsx`.
///
/// Used when two group keys of one upload sanitize to the same file name.
pub fn numbered_file_name(file_name: &str, n: usize) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, n, ext),
        None => format!("{}_{}", file_name, n),
    }
}

/// Render `group` into an [`OutputDocument`] named for `today`.
pub fn render_group(
    group: &Group,
    rules: &ProviderRules,
    today: NaiveDate,
) -> WriterResult<OutputDocument> {
    let bytes = write_group(group, rules, &sheet_label(today))?;
    Ok(OutputDocument {
        file_name: output_file_name(rules, &group.key, today),
        key: group.key.clone(),
        record_count: group.rows.len(),
        total: group.total,
        bytes,
    })
}

/// Serialize one group into xlsx bytes.
pub fn write_group(group: &Group, rules: &ProviderRules, sheet_name: &str) -> WriterResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let mut headers = group.headers();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &header_format)?;
    }

    for (i, row) in group.rows.iter().enumerate() {
        let row_num = (i + 1) as u32;
        for (col, header) in headers.iter().enumerate() {
            if let Some(value) = row.get(header) {
                write_cell(worksheet, row_num, col as u16, value)?;
            }
        }
    }

    if rules.summary_row {
        let summary_row = (group.rows.len() + 2) as u32;
        let label_col = headers.iter().position(|h| h == &rules.group_by).unwrap_or(0);
        let total_col = match headers.iter().position(|h| h == &rules.total_field) {
            Some(col) => col,
            None => {
                headers.push(rules.total_field.clone());
                let col = headers.len() - 1;
                worksheet.write_string_with_format(0, col as u16, &rules.total_field, &header_format)?;
                col
            }
        };

        if label_col != total_col {
            worksheet.write_string_with_format(
                summary_row,
                label_col as u16,
                SUMMARY_LABEL,
                &header_format,
            )?;
        }
        worksheet.write_number_with_format(summary_row, total_col as u16, group.total, &header_format)?;
    }

    worksheet.set_freeze_panes(1, 0)?;
    worksheet.autofit();

    Ok(workbook.save_to_buffer()?)
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> WriterResult<()> {
    match value {
        Value::Null => {}
        Value::Number(n) => {
            worksheet.write_number(row, col, n.as_f64().unwrap_or(0.0))?;
        }
        Value::String(s) => {
            worksheet.write_string(row, col, s)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        other => {
            worksheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::parser::{parse_bytes, SourceFormat};
    use crate::transform::rules::{azure_rules, tencent_rules};
    use calamine::{open_workbook_auto_from_rs, Reader};
    use serde_json::json;
    use std::io::Cursor;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn azure_group() -> Group {
        let mut group = Group::new("Contoso");
        group.push(
            record(json!({"CustomerName": "Contoso", "UnitPrice": 100, "Total": 500.0})),
            500.0,
        );
        group.push(
            record(json!({"CustomerName": "Contoso", "UnitPrice": 2.5, "Total": 5.0})),
            5.0,
        );
        group
    }

    #[test]
    fn test_sheet_label_previous_month() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(sheet_label(day(2026, 10, 19)), "Sep_2026");
        assert_eq!(sheet_label(day(2026, 1, 1)), "Dec_2025");
        assert_eq!(sheet_label(day(2024, 3, 31)), "Feb_2024");
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("Contoso Ltd."), "Contoso Ltd");
        assert_eq!(sanitize_file_component("A/B:C*?"), "A_B_C__");
        assert_eq!(sanitize_file_component("../etc"), "_etc");
        assert_eq!(sanitize_file_component("   "), "unnamed");
    }

    #[test]
    fn test_output_file_name() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(output_file_name(&azure_rules(), "Contoso", day), "Contoso_2026-10-19.xlsx");
        assert_eq!(output_file_name(&tencent_rules(), "123", day), "tencent_123_2026-10-19.xlsx");
    }

    #[test]
    fn test_numbered_file_name() {
        assert_eq!(numbered_file_name("A_B_2026-10-19.xlsx", 2), "A_B_2026-10-19_2.xlsx");
        assert_eq!(numbered_file_name("plain", 3), "plain_3");
    }

    #[test]
    fn test_summary_row_two_below_data() {
        let group = azure_group();
        let bytes = write_group(&group, &azure_rules(), "Sep_2026").unwrap();

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Sep_2026".to_string()]);
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();

        // header + 2 data rows + blank + summary
        assert_eq!(range.height(), 5);
        let blank = range.rows().nth(3).unwrap();
        assert!(blank.iter().all(|c| matches!(c, calamine::Data::Empty)));
        let summary = range.rows().nth(4).unwrap();
        assert_eq!(summary[0], calamine::Data::String("Total".to_string()));
        assert_eq!(summary[2], calamine::Data::Float(505.0));
    }

    #[test]
    fn test_no_summary_for_tencent() {
        let mut group = Group::new("123");
        group.push(record(json!({"Owner Account ID": "123", "Total Cost": 1.0})), 1.0);
        let bytes = write_group(&group, &tencent_rules(), "Sep_2026").unwrap();

        let parsed = parse_bytes(&bytes, SourceFormat::Xlsx).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.headers, vec!["Owner Account ID", "Total Cost"]);
    }

    #[test]
    fn test_render_group_metadata() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let doc = render_group(&azure_group(), &azure_rules(), day).unwrap();

        assert_eq!(doc.file_name, "Contoso_2026-10-19.xlsx");
        assert_eq!(doc.record_count, 2);
        assert_eq!(doc.total, 505.0);
        assert!(doc.bytes.starts_with(b"PK"));
    }
}
