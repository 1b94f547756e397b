//! Pricing table for cost calculation
//!
//! Rates are USD per million tokens, keyed by model-id prefix so dated
//! model ids ("claude-sonnet-4-20250514") resolve to their family row.
//! Unknown models fall back to a default row; the `<synthetic>` model is
//! non-billable and always costs zero.

use crate::types::{Record, Result, TokrollError, SYNTHETIC_MODEL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token rates for one model family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_creation: f64,
}

/// Cost of one record split by token type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_read_cost: f64,
    pub cache_creation_cost: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost + self.cache_read_cost + self.cache_creation_cost
    }
}

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Injected `model -> rates` lookup with a defined default row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    pub models: HashMap<String, ModelPricing>,
    pub default_row: ModelPricing,
}

impl PricingTable {
    /// Built-in rates for current Claude model families.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-opus-4".to_string(),
            ModelPricing {
                input: 15.0,
                output: 75.0,
                cache_read: 1.5,
                cache_creation: 18.75,
            },
        );
        models.insert(
            "claude-sonnet-4".to_string(),
            ModelPricing {
                input: 3.0,
                output: 15.0,
                cache_read: 0.3,
                cache_creation: 3.75,
            },
        );
        models.insert(
            "claude-haiku-4".to_string(),
            ModelPricing {
                input: 1.0,
                output: 5.0,
                cache_read: 0.1,
                cache_creation: 1.25,
            },
        );
        models.insert(
            "claude-3-5-haiku".to_string(),
            ModelPricing {
                input: 0.8,
                output: 4.0,
                cache_read: 0.08,
                cache_creation: 1.0,
            },
        );
        // Non-billable system turns
        models.insert(SYNTHETIC_MODEL.to_string(), ModelPricing::default());

        Self {
            models,
            // Unknown models are billed at sonnet-class rates rather than
            // silently costing nothing
            default_row: ModelPricing {
                input: 3.0,
                output: 15.0,
                cache_read: 0.3,
                cache_creation: 3.75,
            },
        }
    }

    /// Load a table from a JSON document (serving-layer override).
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TokrollError::Pricing(format!("invalid pricing table: {}", e)))
    }

    /// Rates for a model: exact match, then longest matching prefix, then
    /// the default row. Never fails.
    pub fn price(&self, model: &str) -> ModelPricing {
        if let Some(rates) = self.models.get(model) {
            return *rates;
        }
        self.models
            .iter()
            .filter(|(key, _)| model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, rates)| *rates)
            .unwrap_or(self.default_row)
    }

    /// Per-type cost split for one record.
    pub fn cost_breakdown(&self, record: &Record) -> CostBreakdown {
        let rates = self.price(&record.model);
        CostBreakdown {
            input_cost: record.input_tokens as f64 * rates.input / TOKENS_PER_MILLION,
            output_cost: record.output_tokens as f64 * rates.output / TOKENS_PER_MILLION,
            cache_read_cost: record.cache_read_tokens as f64 * rates.cache_read
                / TOKENS_PER_MILLION,
            cache_creation_cost: record.cache_creation_tokens as f64 * rates.cache_creation
                / TOKENS_PER_MILLION,
        }
    }

    /// Total cost for one record.
    pub fn cost(&self, record: &Record) -> f64 {
        self.cost_breakdown(record).total()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn make_record(model: &str, input: u64, output: u64) -> Record {
        Record {
            id: "r1".to_string(),
            timestamp: None,
            model: model.to_string(),
            session_id: "s1".to_string(),
            project: "p".to_string(),
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            tools: HashSet::new(),
            stop_reason: None,
            lines_added: 0,
            lines_removed: 0,
            lines_written: 0,
        }
    }

    #[test]
    fn test_prefix_match_dated_model_id() {
        let table = PricingTable::builtin();
        let dated = table.price("claude-sonnet-4-20250514");
        let family = table.price("claude-sonnet-4");
        assert_eq!(dated, family);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = PricingTable::builtin();
        table.models.insert(
            "claude".to_string(),
            ModelPricing {
                input: 99.0,
                ..ModelPricing::default()
            },
        );
        // "claude-opus-4" is longer than "claude"
        let rates = table.price("claude-opus-4-20250601");
        assert!((rates.input - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_model_uses_default_row() {
        let table = PricingTable::builtin();
        let rates = table.price("gpt-9-mega");
        assert_eq!(rates, table.default_row);
    }

    #[test]
    fn test_synthetic_costs_zero() {
        let table = PricingTable::builtin();
        let record = make_record(SYNTHETIC_MODEL, 1_000_000, 1_000_000);
        assert_eq!(table.cost(&record), 0.0);
    }

    #[test]
    fn test_cost_breakdown_per_million() {
        let table = PricingTable::builtin();
        let mut record = make_record("claude-sonnet-4", 1_000_000, 2_000_000);
        record.cache_read_tokens = 10_000_000;
        record.cache_creation_tokens = 1_000_000;

        let breakdown = table.cost_breakdown(&record);
        assert!((breakdown.input_cost - 3.0).abs() < 1e-9);
        assert!((breakdown.output_cost - 30.0).abs() < 1e-9);
        assert!((breakdown.cache_read_cost - 3.0).abs() < 1e-9);
        assert!((breakdown.cache_creation_cost - 3.75).abs() < 1e-9);
        assert!((table.cost(&record) - breakdown.total()).abs() < 1e-12);
    }

    #[test]
    fn test_from_json_str_override() {
        let json = r#"{
            "models": {
                "claude-sonnet-4": {"input": 1.0, "output": 2.0, "cache_read": 0.1, "cache_creation": 0.5}
            },
            "default_row": {"input": 0.0, "output": 0.0, "cache_read": 0.0, "cache_creation": 0.0}
        }"#;
        let table = PricingTable::from_json_str(json).unwrap();
        assert!((table.price("claude-sonnet-4").input - 1.0).abs() < f64::EPSILON);
        assert_eq!(table.price("mystery"), ModelPricing::default());
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(PricingTable::from_json_str("not json").is_err());
    }
}
