//! Subscription tier store
//!
//! Holds the current tier as an explicit object handed to consumers. Tier
//! changes are observed through [`PlanStore::subscribe`].

use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::{CheckoutOutcome, FeatureKey, PlanLimits, SubscriptionTier};
use crate::infra::{Result, SqliteSettings, TIER_SETTING};

pub struct PlanStore {
    tier: watch::Sender<SubscriptionTier>,
    settings: Option<SqliteSettings>,
}

impl PlanStore {
    /// In-memory store starting at `tier`
    pub fn new(tier: SubscriptionTier) -> Self {
        let (tier, _) = watch::channel(tier);
        Self {
            tier,
            settings: None,
        }
    }

    /// Load the persisted tier, defaulting to FREE
    pub async fn load(settings: SqliteSettings) -> Result<Self> {
        let tier = match settings.get(TIER_SETTING).await? {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Ignoring invalid stored tier");
                SubscriptionTier::Free
            }),
            None => SubscriptionTier::Free,
        };

        let (tier, _) = watch::channel(tier);
        Ok(Self {
            tier,
            settings: Some(settings),
        })
    }

    pub fn tier(&self) -> SubscriptionTier {
        *self.tier.borrow()
    }

    pub fn limits(&self) -> PlanLimits {
        self.tier().limits()
    }

    pub fn has_feature(&self, feature: FeatureKey) -> bool {
        self.limits().allows(feature)
    }

    pub fn has_capacity(&self, current_count: usize) -> bool {
        self.limits().has_capacity(current_count)
    }

    /// Observe tier changes
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionTier> {
        self.tier.subscribe()
    }

    /// Change and persist the tier
    pub async fn set_tier(&self, tier: SubscriptionTier) -> Result<()> {
        if let Some(settings) = &self.settings {
            settings.set(TIER_SETTING, tier.as_str()).await?;
        }
        let previous = self.tier.send_replace(tier);
        if previous != tier {
            info!(from = %previous, to = %tier, "Subscription tier changed");
        }
        Ok(())
    }

    /// Apply the result of an external checkout; returns the tier in effect
    pub async fn apply_checkout(&self, outcome: CheckoutOutcome) -> Result<SubscriptionTier> {
        match outcome {
            CheckoutOutcome::Completed { tier } => {
                self.set_tier(tier).await?;
                Ok(tier)
            }
            CheckoutOutcome::Failed { reason } => {
                warn!(reason = %reason, "Checkout failed, tier unchanged");
                Ok(self.tier())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_sees_upgrade() {
        let store = PlanStore::new(SubscriptionTier::Free);
        let mut rx = store.subscribe();
        assert!(!store.has_feature(FeatureKey::ExportCompliance));

        let tier = store
            .apply_checkout(CheckoutOutcome::Completed {
                tier: SubscriptionTier::Pro,
            })
            .await
            .unwrap();
        assert_eq!(tier, SubscriptionTier::Pro);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SubscriptionTier::Pro);
        assert!(store.has_feature(FeatureKey::ExportCompliance));
        assert!(store.has_capacity(99));
    }

    #[tokio::test]
    async fn test_failed_checkout_keeps_tier() {
        let store = PlanStore::new(SubscriptionTier::Free);
        let tier = store
            .apply_checkout(CheckoutOutcome::Failed {
                reason: "card declined".into(),
            })
            .await
            .unwrap();
        assert_eq!(tier, SubscriptionTier::Free);
    }

    #[tokio::test]
    async fn test_tier_persists() {
        let pool = crate::infra::sqlite::open_local_in_memory().await.unwrap();
        let store = PlanStore::load(SqliteSettings::new(pool.clone())).await.unwrap();
        assert_eq!(store.tier(), SubscriptionTier::Free);
        store.set_tier(SubscriptionTier::Enterprise).await.unwrap();

        let reloaded = PlanStore::load(SqliteSettings::new(pool)).await.unwrap();
        assert_eq!(reloaded.tier(), SubscriptionTier::Enterprise);
    }

    #[tokio::test]
    async fn test_completed_checkout_persists_and_unlocks_features() {
        let pool = crate::infra::sqlite::open_local_in_memory().await.unwrap();
        let store = PlanStore::load(SqliteSettings::new(pool.clone())).await.unwrap();
        store
            .apply_checkout(CheckoutOutcome::Completed {
                tier: SubscriptionTier::Pro,
            })
            .await
            .unwrap();
        store
            .apply_checkout(CheckoutOutcome::Failed {
                reason: "cancelled".into(),
            })
            .await
            .unwrap();

        let reloaded = PlanStore::load(SqliteSettings::new(pool)).await.unwrap();
        assert_eq!(reloaded.tier(), SubscriptionTier::Pro);
        let enabled: Vec<FeatureKey> = FeatureKey::ALL
            .into_iter()
            .filter(|f| reloaded.has_feature(*f))
            .collect();
        assert_eq!(
            enabled,
            vec![
                FeatureKey::ExportCompliance,
                FeatureKey::CustomBranding,
                FeatureKey::BulkUpload
            ]
        );
    }
}
