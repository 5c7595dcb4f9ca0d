use serde::{Deserialize, Serialize};

use super::policy::DepositRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub shop_id: String,
    #[serde(default)]
    pub name: String,
    pub duration_minutes: u32,
    pub price: PriceRange,
    #[serde(default)]
    pub deposit: DepositRule,
}

/// Advertised price band. Reservations are quoted at `min`; `max` is the ceiling
/// a shop may settle at after the service is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: i64,
    pub max: i64,
}

impl Service {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.duration_minutes == 0 {
            anyhow::bail!("service {}: duration must be positive", self.id);
        }
        if self.price.min < 0 || self.price.max < self.price.min {
            anyhow::bail!("service {}: invalid price range", self.id);
        }
        self.deposit.validate()
    }

    pub fn deposit_per_unit(&self) -> i64 {
        self.deposit.amount_for(self.price.min)
    }
}
