//! Provider rule sets.
//!
//! A [`ProviderRules`] value describes everything provider-specific about a
//! billing export: which fields must be present, which rows are excluded,
//! which columns are dropped or kept, which columns are computed, and how
//! rows are grouped. The engine in [`super::grouper`] interprets it.
//!
//! Built-in rules exist for Azure and Tencent; both can be overridden with a
//! JSON file of the same shape (see [`ProviderRules::to_json`]).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use crate::models::Provider;

/// Filter, column and derivation rules for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRules {
    /// Provider these rules apply to
    pub provider: Provider,

    /// Field whose value is the group key
    pub group_by: String,

    /// Rows missing any of these fields (or holding an empty value) are dropped
    #[serde(default)]
    pub required_keys: Vec<String>,

    /// Rows where `field` equals `value` are dropped
    #[serde(default)]
    pub excluded_values: Vec<ExcludedValue>,

    /// Fields removed from every row (missing keys tolerated)
    #[serde(default)]
    pub denied_keys: Vec<String>,

    /// When set, rows are rebuilt with only these fields, in this order
    #[serde(default)]
    pub kept_keys: Option<Vec<String>>,

    /// Computed columns, applied in order
    #[serde(default)]
    pub derivations: Vec<Derivation>,

    /// Field summed into the group total
    pub total_field: String,

    /// Write a summary row under the data in each output workbook
    #[serde(default)]
    pub summary_row: bool,

    /// Prefix prepended to output file names
    #[serde(default)]
    pub file_prefix: String,
}

/// A `(field, value)` pair that excludes a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedValue {
    pub field: String,
    pub value: String,
}

/// A computed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Derivation {
    /// `target = value`
    Constant { target: String, value: Value },

    /// `target = factors[0] × factors[1] × ...`, each factor coerced with
    /// [`parse_numeric_or_zero`]
    Product { target: String, factors: Vec<String> },
}

impl Derivation {
    pub fn target(&self) -> &str {
        match self {
            Derivation::Constant { target, .. } | Derivation::Product { target, .. } => target,
        }
    }
}

impl ProviderRules {
    /// Built-in rules for `provider`.
    pub fn builtin(provider: Provider) -> Self {
        match provider {
            Provider::Azure => azure_rules(),
            Provider::Tencent => tencent_rules(),
        }
    }

    /// Parse rules from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize rules to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load rules from a JSON file.
    pub fn load(path: &Path) -> Result<Self, crate::error::PipelineError> {
        let content = std::fs::read_to_string(path).map_err(crate::error::StoreError::Io)?;
        Ok(Self::from_json(&content)?)
    }
}

/// Azure CSP invoice reconciliation export.
pub fn azure_rules() -> ProviderRules {
    ProviderRules {
        provider: Provider::Azure,
        group_by: "CustomerName".to_string(),
        required_keys: strings(&["CustomerName", "Quantity"]),
        excluded_values: vec![ExcludedValue {
            field: "Bill to".to_string(),
            value: "Accord".to_string(),
        }],
        denied_keys: strings(&[
            "PartnerId",
            "CustomerId",
            "InvoiceNumber",
            "MpnId",
            "Tier2MpnId",
            "Bill to",
            "PriceAdjustmentDescription",
            "EffectiveUnitPrice",
        ]),
        kept_keys: None,
        derivations: vec![
            Derivation::Product {
                target: "Subtotal".to_string(),
                factors: strings(&["UnitPrice", "BillableQuantity"]),
            },
            Derivation::Product {
                target: "Total".to_string(),
                factors: strings(&["UnitPrice", "BillableQuantity"]),
            },
        ],
        total_field: "Total".to_string(),
        summary_row: true,
        file_prefix: String::new(),
    }
}

/// Tencent Cloud bill details export.
pub fn tencent_rules() -> ProviderRules {
    ProviderRules {
        provider: Provider::Tencent,
        group_by: "Owner Account ID".to_string(),
        required_keys: strings(&["Owner Account ID", "OriginalCost"]),
        excluded_values: Vec::new(),
        denied_keys: Vec::new(),
        kept_keys: Some(strings(&[
            "Owner Account ID",
            "ProductName",
            "SubproductName",
            "BillingMode",
            "ProjectName",
            "Region",
            "InstanceID",
            "InstanceName",
            "TransactionType",
            "TransactionTime",
            "Usage Start Time",
            "Usage End Time",
            "Configuration Description",
            "OriginalCost",
        ])),
        derivations: vec![
            Derivation::Constant {
                target: "Discount Multiplier".to_string(),
                value: json!(1),
            },
            Derivation::Product {
                target: "Total Cost".to_string(),
                factors: strings(&["OriginalCost", "Discount Multiplier"]),
            },
        ],
        total_field: "Total Cost".to_string(),
        summary_row: false,
        file_prefix: "tencent_".to_string(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Rules for every provider, built-in unless overridden.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub azure: ProviderRules,
    pub tencent: ProviderRules,
}

impl RuleSet {
    pub fn builtin() -> Self {
        Self {
            azure: azure_rules(),
            tencent: tencent_rules(),
        }
    }

    /// Built-in rules, replaced by `<dir>/azure.json` / `<dir>/tencent.json`
    /// when those files exist.
    pub fn from_dir(dir: &Path) -> Result<Self, crate::error::PipelineError> {
        let mut set = Self::builtin();
        for provider in Provider::ALL {
            let path = dir.join(format!("{}.json", provider.as_str()));
            if path.is_file() {
                let rules = ProviderRules::load(&path)?;
                *set.get_mut(provider) = rules;
            }
        }
        Ok(set)
    }

    pub fn get(&self, provider: Provider) -> &ProviderRules {
        match provider {
            Provider::Azure => &self.azure,
            Provider::Tencent => &self.tencent,
        }
    }

    fn get_mut(&mut self, provider: Provider) -> &mut ProviderRules {
        match provider {
            Provider::Azure => &mut self.azure,
            Provider::Tencent => &mut self.tencent,
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

// =============================================================================
// Value helpers
// =============================================================================

/// Coerce a cell to a number; anything unparsable is zero.
///
/// Numbers pass through. Text is trimmed and thousands separators removed
/// before parsing. Empty, boolean, non-numeric and non-finite values give 0.
pub fn parse_numeric_or_zero(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

/// True when a field is missing, null, or blank text.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Render a cell as text (group keys, exclusion matches).
///
/// Text is returned as-is; exclusions match the exact value and keys that
/// differ only in whitespace form separate groups. The readers already trim
/// cells at load time.
pub fn value_to_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}
