//! Transformation module.
//!
//! - Rules: per-provider filtering, column shaping and derived fields
//! - Grouper: records to per-key groups with running totals
//! - Pipeline: parse, group, write and store one upload

pub mod grouper;
pub mod pipeline;
pub mod rules;

pub use grouper::{group_records, transform_record};
pub use pipeline::*;
pub use rules::{Derivation, ExcludedValue, ProviderRules, RuleSet};
