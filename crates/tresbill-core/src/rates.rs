//! Per-resource-hour rate cards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::tier::Tier;

/// Rates for one tier, in currency units per resource-hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    /// Per CPU core-hour.
    pub cpu: f64,
    /// Per GPU-hour.
    pub gpu: f64,
    /// Per memory GB-hour.
    pub mem: f64,
}

impl RateCard {
    /// Reject negative or non-finite rates.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidRate`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("cpu", self.cpu), ("gpu", self.gpu), ("mem", self.mem)] {
            if !value.is_finite() || value < 0.0 {
                return Err(BillingError::InvalidRate {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Rate cards for every tier.
///
/// Unknown tiers price at the `private` card, the most conservative one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// Cards keyed by tier name; `BTreeMap` keeps serialization stable.
    pub tiers: BTreeMap<String, RateCard>,
}

impl Default for RateTable {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            Tier::Mu.as_str().to_string(),
            RateCard {
                cpu: 1.0,
                gpu: 5.0,
                mem: 0.5,
            },
        );
        tiers.insert(
            Tier::Gov.as_str().to_string(),
            RateCard {
                cpu: 3.0,
                gpu: 10.0,
                mem: 1.0,
            },
        );
        tiers.insert(
            Tier::Private.as_str().to_string(),
            RateCard {
                cpu: 5.0,
                gpu: 100.0,
                mem: 2.0,
            },
        );
        Self { tiers }
    }
}

impl RateTable {
    /// Card for a tier, falling back to `private` and finally the built-in
    /// private defaults if the table was emptied.
    #[must_use]
    pub fn for_tier(&self, tier: Tier) -> RateCard {
        if let Some(card) = self.tiers.get(tier.as_str()) {
            return *card;
        }
        self.tiers
            .get(Tier::Private.as_str())
            .copied()
            .unwrap_or(RateCard {
                cpu: 5.0,
                gpu: 100.0,
                mem: 2.0,
            })
    }

    /// Replace one tier's card.
    pub fn set(&mut self, tier: Tier, card: RateCard) {
        self.tiers.insert(tier.as_str().to_string(), card);
    }
}
