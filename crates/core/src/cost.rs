use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::domain::ledger::TokenUsage;
use crate::domain::tier::ModelTier;

const TOKENS_PER_MILLION: i64 = 1_000_000;

/// USD price of one million tokens, split by direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPrice {
    pub input_per_mtok: Decimal,
    pub output_per_mtok: Decimal,
}

impl TierPrice {
    pub fn new(input_per_mtok: Decimal, output_per_mtok: Decimal) -> Self {
        Self { input_per_mtok, output_per_mtok }
    }

    fn per_token(value: Decimal) -> Decimal {
        value / Decimal::from(TOKENS_PER_MILLION)
    }
}

/// Fixed price table keyed by model tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    pub premium: TierPrice,
    pub economy: TierPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            premium: TierPrice::new(Decimal::new(300, 2), Decimal::new(1_500, 2)),
            economy: TierPrice::new(Decimal::new(80, 2), Decimal::new(400, 2)),
        }
    }
}

impl From<&PricingConfig> for PriceTable {
    fn from(config: &PricingConfig) -> Self {
        Self {
            premium: TierPrice::new(config.premium_input_per_mtok, config.premium_output_per_mtok),
            economy: TierPrice::new(config.economy_input_per_mtok, config.economy_output_per_mtok),
        }
    }
}

impl PriceTable {
    pub fn price_for(&self, tier: ModelTier) -> TierPrice {
        match tier {
            ModelTier::Premium => self.premium,
            ModelTier::Economy => self.economy,
        }
    }

    /// Exact cost of one completion call. Linear in both token counts.
    pub fn cost(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> Decimal {
        let price = self.price_for(tier);
        Decimal::from(input_tokens) * TierPrice::per_token(price.input_per_mtok)
            + Decimal::from(output_tokens) * TierPrice::per_token(price.output_per_mtok)
    }

    pub fn cost_of(&self, tier: ModelTier, usage: TokenUsage) -> Decimal {
        self.cost(tier, usage.input_tokens, usage.output_tokens)
    }
}
