//! Apply provider rules to parsed records and group the survivors.
//!
//! # Architecture
//!
//! ```text
//! Parsed records                  →  Grouped report
//! ┌──────────────────────────┐       ┌──────────────────────────┐
//! │ Customer: A, Qty: 5      │       │ A: [row, row]  total 700 │
//! │ Customer: B, Qty: 1      │  →    ├──────────────────────────┤
//! │ Customer: A, Qty: 2      │       │ B: [row]       total 30  │
//! │ Customer: C, Qty: (none) │       └──────────────────────────┘
//! └──────────────────────────┘         (C dropped: no quantity)
//! ```
//!
//! Each record goes through: required-field check, exclusion check, column
//! removal or selection, derivations, then grouping. Group totals accumulate
//! in input order.

use serde_json::{json, Value};

use super::rules::{is_blank, parse_numeric_or_zero, value_to_text, Derivation, ProviderRules};
use crate::models::{GroupedReport, Record};

/// Transform and group `records` according to `rules`.
///
/// Pure: no IO, no logging.
pub fn group_records(records: Vec<Record>, rules: &ProviderRules) -> GroupedReport {
    let mut report = GroupedReport::new();
    report.input_rows = records.len();

    for record in records {
        match transform_record(record, rules) {
            Some((key, row, amount)) => report.push(&key, row, amount),
            None => report.dropped_rows += 1,
        }
    }

    report
}

/// Transform one record. Returns `(group key, row, total amount)`, or `None`
/// when the record is filtered out.
pub fn transform_record(record: Record, rules: &ProviderRules) -> Option<(String, Record, f64)> {
    if rules.required_keys.iter().any(|k| is_blank(record.get(k))) {
        return None;
    }

    let excluded = rules
        .excluded_values
        .iter()
        .any(|ex| value_to_text(record.get(&ex.field)) == ex.value);
    if excluded {
        return None;
    }

    let mut row = shape_columns(record, rules);
    for derivation in &rules.derivations {
        apply_derivation(&mut row, derivation);
    }

    let key = value_to_text(row.get(&rules.group_by));
    if key.is_empty() {
        return None;
    }

    let amount = parse_numeric_or_zero(row.get(&rules.total_field));
    Some((key, row, amount))
}

/// Keep-list rebuilds the row in keep-list order; otherwise denied fields are
/// removed and the source order is kept.
fn shape_columns(record: Record, rules: &ProviderRules) -> Record {
    match &rules.kept_keys {
        Some(kept) => {
            let mut row = Record::new();
            for key in kept {
                let value = record.get(key).cloned().unwrap_or_else(|| json!(""));
                row.insert(key.clone(), value);
            }
            row
        }
        None => record
            .into_iter()
            .filter(|(k, _)| !rules.denied_keys.contains(k))
            .collect(),
    }
}

fn apply_derivation(row: &mut Record, derivation: &Derivation) {
    match derivation {
        Derivation::Constant { target, value } => {
            row.insert(target.clone(), value.clone());
        }
        Derivation::Product { target, factors } => {
            let product: f64 = factors
                .iter()
                .map(|f| parse_numeric_or_zero(row.get(f)))
                .product();
            row.insert(target.clone(), Value::from(product));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::rules::{azure_rules, tencent_rules};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn azure_row(customer: &str, price: f64, qty: f64) -> Record {
        record(json!({
            "PartnerId": "p-1",
            "CustomerId": "c-1",
            "CustomerName": customer,
            "InvoiceNumber": "G001",
            "MpnId": 1,
            "Bill to": "Contoso Ltd",
            "UnitPrice": price,
            "Quantity": qty,
            "BillableQuantity": qty,
            "EffectiveUnitPrice": price
        }))
    }

    #[test]
    fn test_accord_rows_excluded() {
        let records = vec![
            record(json!({"CustomerName": "A", "UnitPrice": 100, "BillableQuantity": 5, "Quantity": 5})),
            record(json!({"CustomerName": "A", "UnitPrice": 50, "BillableQuantity": 2, "Quantity": 2, "Bill to": "Accord"})),
        ];

        let report = group_records(records, &azure_rules());

        assert_eq!(report.len(), 1);
        let group = report.get("A").unwrap();
        assert_eq!(group.rows.len(), 1);
        assert_eq!(group.rows[0]["Total"].as_f64(), Some(500.0));
        assert_eq!(group.total, 500.0);
        assert_eq!(report.dropped_rows, 1);
    }

    #[test]
    fn test_exclusion_matches_exact_value() {
        let records = vec![
            record(json!({"CustomerName": "A", "UnitPrice": 1, "BillableQuantity": 1, "Quantity": 1, "Bill to": "Accord "})),
            record(json!({"CustomerName": "A", "UnitPrice": 1, "BillableQuantity": 1, "Quantity": 1, "Bill to": "accord"})),
            record(json!({"CustomerName": "A", "UnitPrice": 1, "BillableQuantity": 1, "Quantity": 1, "Bill to": "Accord"})),
        ];

        let report = group_records(records, &azure_rules());

        assert_eq!(report.get("A").unwrap().rows.len(), 2);
        assert_eq!(report.dropped_rows, 1);
    }

    #[test]
    fn test_keys_are_not_trimmed() {
        let records = vec![
            record(json!({"CustomerName": "A", "UnitPrice": 1, "BillableQuantity": 1, "Quantity": 1})),
            record(json!({"CustomerName": " A", "UnitPrice": 2, "BillableQuantity": 1, "Quantity": 1})),
        ];

        let report = group_records(records, &azure_rules());

        assert_eq!(report.len(), 2);
        assert_eq!(report.get("A").unwrap().total, 1.0);
        assert_eq!(report.get(" A").unwrap().total, 2.0);
    }

    #[test]
    fn test_missing_quantity_dropped_not_zero_filled() {
        let records = vec![
            record(json!({"CustomerName": "A", "UnitPrice": 10, "BillableQuantity": 1, "Quantity": null})),
            record(json!({"CustomerName": "B", "UnitPrice": 10, "BillableQuantity": 1})),
            record(json!({"CustomerName": "", "UnitPrice": 10, "BillableQuantity": 1, "Quantity": 1})),
            record(json!({"CustomerName": "C", "UnitPrice": 10, "BillableQuantity": 1, "Quantity": 1})),
        ];

        let report = group_records(records, &azure_rules());

        assert_eq!(report.len(), 1);
        assert!(report.get("A").is_none());
        assert!(report.get("B").is_none());
        assert_eq!(report.kept_rows(), 1);
        assert_eq!(report.dropped_rows, 3);
    }

    #[test]
    fn test_azure_denied_columns_removed_in_order() {
        let report = group_records(vec![azure_row("A", 2.0, 3.0)], &azure_rules());
        let row = &report.get("A").unwrap().rows[0];

        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["CustomerName", "UnitPrice", "Quantity", "BillableQuantity", "Subtotal", "Total"]
        );
        assert_eq!(row["Subtotal"], row["Total"]);
    }

    #[test]
    fn test_azure_unparsable_numbers_become_zero() {
        let records = vec![record(json!({
            "CustomerName": "A", "Quantity": 1, "UnitPrice": "abc", "BillableQuantity": 4
        }))];

        let report = group_records(records, &azure_rules());
        let group = report.get("A").unwrap();
        assert_eq!(group.rows[0]["Total"].as_f64(), Some(0.0));
        assert_eq!(group.total, 0.0);
    }

    #[test]
    fn test_azure_totals_and_row_conservation() {
        let records = vec![
            azure_row("A", 1.5, 2.0),
            azure_row("B", 10.0, 1.0),
            azure_row("A", 0.25, 4.0),
            record(json!({"CustomerName": "B", "Quantity": ""})),
        ];
        let input = records.len();

        let report = group_records(records, &azure_rules());

        assert_eq!(report.kept_rows() + report.dropped_rows, input);
        let a = report.get("A").unwrap();
        let expected: f64 = a
            .rows
            .iter()
            .map(|r| {
                parse_numeric_or_zero(r.get("UnitPrice"))
                    * parse_numeric_or_zero(r.get("BillableQuantity"))
            })
            .sum();
        assert_eq!(a.total, expected);
        assert_eq!(a.total, 4.0);
        // Input order inside a group
        assert_eq!(a.rows[0]["UnitPrice"].as_f64(), Some(1.5));
        assert_eq!(a.rows[1]["UnitPrice"].as_f64(), Some(0.25));
    }

    #[test]
    fn test_tencent_discount_and_total_cost() {
        let records = vec![record(json!({"Owner Account ID": "123", "OriginalCost": "25.75"}))];

        let report = group_records(records, &tencent_rules());
        let group = report.get("123").unwrap();
        let row = &group.rows[0];

        assert_eq!(row["Discount Multiplier"], json!(1));
        assert_eq!(row["Total Cost"].as_f64(), Some(25.75));
        assert_eq!(row["ProductName"], "");
        assert_eq!(group.total, 25.75);
    }

    #[test]
    fn test_tencent_keeps_only_listed_columns() {
        let records = vec![record(json!({
            "Region": "ap-guangzhou",
            "Owner Account ID": 100012345678_i64,
            "Payer Account ID": "999",
            "OriginalCost": 3.5
        }))];

        let report = group_records(records, &tencent_rules());
        let group = report.get("100012345678").unwrap();
        let row = &group.rows[0];

        assert!(row.get("Payer Account ID").is_none());
        assert_eq!(row.len(), 16);
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys[0], "Owner Account ID");
        assert_eq!(keys[13], "OriginalCost");
        assert_eq!(keys[14], "Discount Multiplier");
        assert_eq!(keys[15], "Total Cost");
    }

    #[test]
    fn test_tencent_missing_cost_dropped() {
        let records = vec![
            record(json!({"Owner Account ID": "1", "OriginalCost": null})),
            record(json!({"Owner Account ID": null, "OriginalCost": "5"})),
            record(json!({"Owner Account ID": "2", "OriginalCost": "0"})),
        ];

        let report = group_records(records, &tencent_rules());
        assert_eq!(report.len(), 1);
        assert_eq!(report.get("2").unwrap().total, 0.0);
    }

    #[test]
    fn test_every_row_in_group_has_same_schema() {
        let records = vec![
            record(json!({"Owner Account ID": "1", "OriginalCost": "1", "Region": "x"})),
            record(json!({"Owner Account ID": "1", "OriginalCost": "2"})),
        ];

        let report = group_records(records, &tencent_rules());
        let rows = &report.get("1").unwrap().rows;
        let first: Vec<&String> = rows[0].keys().collect();
        let second: Vec<&String> = rows[1].keys().collect();
        assert_eq!(first, second);
    }
}
