//! Chat model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token, keyed by bare model name
//! (route prefixes such as `openai/` are stripped by the caller).

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// gpt-3.5-turbo: $0.50/1M input, $1.50/1M output
const GPT_35_TURBO: ModelPricing = ModelPricing::new(500, 1_500);
// gpt-4: $30/1M input, $60/1M output
const GPT_4: ModelPricing = ModelPricing::new(30_000, 60_000);
// gpt-4-turbo: $10/1M input, $30/1M output
const GPT_4_TURBO: ModelPricing = ModelPricing::new(10_000, 30_000);
// gpt-4o: $2.50/1M input, $10/1M output
const GPT_4O: ModelPricing = ModelPricing::new(2_500, 10_000);
// gpt-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);

/// Fallback for models missing from the table.
const UNKNOWN_MODEL: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("gpt-3.5-turbo", GPT_35_TURBO);
    map.insert("gpt-3.5-turbo-0125", GPT_35_TURBO);
    map.insert("gpt-4", GPT_4);
    map.insert("gpt-4-turbo", GPT_4_TURBO);
    map.insert("gpt-4-turbo-2024-04-09", GPT_4_TURBO);
    map.insert("gpt-4o", GPT_4O);
    map.insert("gpt-4o-mini", GPT_4O_MINI);
    map
}

pub fn get_pricing(model: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model).copied()
}

/// Calculate chat cost, defaulting to a mid-range price for unknown models.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(UNKNOWN_MODEL)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost() {
        // 1K input + 1K output for gpt-3.5-turbo
        // Input: 1000 * 500 = 500,000 nanos
        // Output: 1000 * 1500 = 1,500,000 nanos
        let cost = chat_cost("gpt-3.5-turbo", 1_000, 1_000);
        assert_eq!(cost, 2_000_000);
    }

    #[test]
    fn unknown_model_uses_fallback_price() {
        assert!(get_pricing("some-local-model").is_none());
        assert_eq!(chat_cost("some-local-model", 1, 1), 6_000);
    }
}
