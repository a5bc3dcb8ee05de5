//! Domain models for the billing report pipeline.
//!
//! - [`Record`] - One parsed input row (ordered field → value map)
//! - [`Provider`] - Billing data source (Azure or Tencent)
//! - [`Group`] - Rows sharing a group key, with their running total
//! - [`GroupedReport`] - All groups produced from one upload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One input row. Keys keep the source column order.
pub type Record = Map<String, Value>;

// =============================================================================
// Provider
// =============================================================================

/// A supported billing export source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Azure,
    Tencent,
}

impl Provider {
    /// All providers, in listing order.
    pub const ALL: [Provider; 2] = [Provider::Azure, Provider::Tencent];

    /// Lowercase identifier used in URLs and directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Azure => "azure",
            Provider::Tencent => "tencent",
        }
    }

    /// Capitalized name used as folder prefix inside archives.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Azure => "Azure",
            Provider::Tencent => "Tencent",
        }
    }

    /// Upload extensions accepted for this provider.
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Provider::Azure => &[".xlsx"],
            Provider::Tencent => &[".xlsx", ".csv"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "azure" => Ok(Provider::Azure),
            "tencent" => Ok(Provider::Tencent),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

// =============================================================================
// Groups
// =============================================================================

/// Rows sharing one group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    /// Group key (customer name or owner account id).
    pub key: String,
    /// Member rows in input order.
    pub rows: Vec<Record>,
    /// Running sum of each row's total field.
    pub total: f64,
}

impl Group {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rows: Vec::new(),
            total: 0.0,
        }
    }

    /// Append a row and add `amount` to the running total.
    pub fn push(&mut self, row: Record, amount: f64) {
        self.rows.push(row);
        self.total += amount;
    }

    /// Field names in first-seen order across all rows.
    pub fn headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }
        headers
    }
}

/// All groups produced from one upload, in order of first appearance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupedReport {
    pub groups: Vec<Group>,
    /// Records received from the reader.
    pub input_rows: usize,
    /// Records dropped by the filters.
    pub dropped_rows: usize,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl GroupedReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to the group for `key`, creating it on first sight.
    pub fn push(&mut self, key: &str, row: Record, amount: f64) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.groups.push(Group::new(key));
                let idx = self.groups.len() - 1;
                self.index.insert(key.to_string(), idx);
                idx
            }
        };
        self.groups[idx].push(row, amount);
    }

    pub fn get(&self, key: &str) -> Option<&Group> {
        self.index.get(key).map(|&idx| &self.groups[idx])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows that survived filtering, summed over all groups.
    pub fn kept_rows(&self) -> usize {
        self.groups.iter().map(|g| g.rows.len()).sum()
    }

    /// Sum of all group totals.
    pub fn grand_total(&self) -> f64 {
        self.groups.iter().map(|g| g.total).sum()
    }
}
