//! Per-model token pricing used to estimate the cost of each model call.
//!
//! Built-in rates cover the default providers; `[pricing.<provider>.<model>]`
//! tables in the config override or extend them:
//!
//! ```toml
//! [pricing.deepseek."deepseek-chat"]
//! prompt_per_1m = 0.27
//! completion_per_1m = 1.10
//! ```

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingEntry {
    pub prompt_per_1k: Option<f64>,
    pub completion_per_1k: Option<f64>,
    pub prompt_per_1m: Option<f64>,
    pub completion_per_1m: Option<f64>,
}

impl PricingEntry {
    pub fn normalized(&self) -> Option<PricingRate> {
        let prompt = self
            .prompt_per_1k
            .or_else(|| self.prompt_per_1m.map(|value| value / 1000.0));
        let completion = self
            .completion_per_1k
            .or_else(|| self.completion_per_1m.map(|value| value / 1000.0));
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        Some(PricingRate {
            prompt_per_1k: prompt.unwrap_or(0.0),
            completion_per_1k: completion.unwrap_or(0.0),
        })
    }
}

/// USD per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl PricingRate {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Rates keyed by provider then model name.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, HashMap<String, PricingRate>>,
}

impl PricingTable {
    /// Built-in rates merged with config overrides.
    pub fn with_overrides(overrides: &HashMap<String, HashMap<String, PricingEntry>>) -> Self {
        let mut table = Self::builtin();
        for (provider, models) in overrides {
            for (model, entry) in models {
                if let Some(rate) = entry.normalized() {
                    table
                        .rates
                        .entry(provider.to_lowercase())
                        .or_default()
                        .insert(model.to_lowercase(), rate);
                }
            }
        }
        table
    }

    pub fn builtin() -> Self {
        let mut rates: HashMap<String, HashMap<String, PricingRate>> = HashMap::new();
        let mut add = |provider: &str, model: &str, prompt_per_1m: f64, completion_per_1m: f64| {
            rates.entry(provider.to_string()).or_default().insert(
                model.to_string(),
                PricingRate {
                    prompt_per_1k: prompt_per_1m / 1000.0,
                    completion_per_1k: completion_per_1m / 1000.0,
                },
            );
        };
        add("deepseek", "deepseek-chat", 0.27, 1.10);
        add("deepseek", "deepseek-reasoner", 0.55, 2.19);
        add("openai", "gpt-4o", 2.50, 10.00);
        add("openai", "gpt-4o-mini", 0.15, 0.60);
        add("openai", "gpt-3.5-turbo", 0.50, 1.50);
        Self { rates }
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<PricingRate> {
        let models = self.rates.get(&provider.to_lowercase())?;
        models
            .get(model)
            .or_else(|| models.get(&model.to_lowercase()))
            .copied()
    }

    /// Estimated cost in USD; zero for models without a known rate.
    pub fn cost(&self, provider: &str, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        match self.lookup(provider, model) {
            Some(rate) => rate.cost(prompt_tokens, completion_tokens),
            None => {
                tracing::debug!(provider, model, "no pricing entry; cost recorded as 0");
                0.0
            }
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}
