//! Rate card persistence.

use sqlx::Row;

use tresbill_core::{RateCard, RateTable, Tier};

use crate::error::Result;
use crate::{now_iso, Store};

impl Store {
    /// Insert the built-in default cards for any tier without a row.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails.
    pub async fn seed_default_rates(&self) -> Result<()> {
        let defaults = RateTable::default();
        for (tier, card) in &defaults.tiers {
            sqlx::query(
                "INSERT OR IGNORE INTO rates (tier, cpu, gpu, mem, updated_at) \
                 VALUES (?, ?, ?, ?, NULL)",
            )
            .bind(tier)
            .bind(card.cpu)
            .bind(card.gpu)
            .bind(card.mem)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// The current rate table: built-in defaults overlaid with stored rows.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn load_rates(&self) -> Result<RateTable> {
        let mut table = RateTable::default();
        let rows = sqlx::query("SELECT tier, cpu, gpu, mem FROM rates")
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let tier: String = row.try_get("tier")?;
            table.tiers.insert(
                tier,
                RateCard {
                    cpu: row.try_get("cpu")?,
                    gpu: row.try_get("gpu")?,
                    mem: row.try_get("mem")?,
                },
            );
        }
        Ok(table)
    }

    /// Replace one tier's card.
    ///
    /// # Errors
    ///
    /// Returns a validation error for negative or non-finite rates, or a
    /// database error if the upsert fails.
    pub async fn save_tier_rates(&self, tier: Tier, card: RateCard) -> Result<()> {
        card.validate()?;
        sqlx::query(
            "INSERT INTO rates (tier, cpu, gpu, mem, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(tier) DO UPDATE SET \
               cpu = excluded.cpu, \
               gpu = excluded.gpu, \
               mem = excluded.mem, \
               updated_at = excluded.updated_at",
        )
        .bind(tier.as_str())
        .bind(card.cpu)
        .bind(card.gpu)
        .bind(card.mem)
        .bind(now_iso())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The current card for one tier.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn rate_for_tier(&self, tier: Tier) -> Result<RateCard> {
        Ok(self.load_rates().await?.for_tier(tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    #[tokio::test]
    async fn defaults_seed_once_and_survive_updates() {
        let store = test_store().await;
        store.seed_default_rates().await.unwrap();

        let table = store.load_rates().await.unwrap();
        assert_eq!(table.for_tier(Tier::Mu).cpu, 1.0);

        store
            .save_tier_rates(
                Tier::Mu,
                RateCard {
                    cpu: 2.5,
                    gpu: 6.0,
                    mem: 0.75,
                },
            )
            .await
            .unwrap();

        // Re-seeding must not clobber the admin's update.
        store.seed_default_rates().await.unwrap();
        let card = store.rate_for_tier(Tier::Mu).await.unwrap();
        assert_eq!(card.cpu, 2.5);
        assert_eq!(card.mem, 0.75);
    }

    #[tokio::test]
    async fn invalid_rates_are_rejected() {
        let store = test_store().await;
        let err = store
            .save_tier_rates(
                Tier::Gov,
                RateCard {
                    cpu: -1.0,
                    gpu: 0.0,
                    mem: 0.0,
                },
            )
            .await;
        assert!(err.is_err());
    }
}
