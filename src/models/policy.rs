use serde::{Deserialize, Serialize};

use super::reschedule::RequesterRole;

/// An amount derived from a base price: nothing, a fixed sum, or a percentage.
///
/// Deposit rules and reschedule fees share this shape. Being a single tagged
/// value, a rule can never carry both a fixed amount and a percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmountRule {
    #[default]
    None,
    Fixed {
        amount: i64,
    },
    Percentage {
        pct: u32,
    },
}

pub type DepositRule = AmountRule;
pub type FeeRule = AmountRule;

impl AmountRule {
    /// Amount owed under this rule for `base`, never more than `base`.
    pub fn amount_for(&self, base: i64) -> i64 {
        let base = base.max(0);
        match *self {
            AmountRule::None => 0,
            AmountRule::Fixed { amount } => amount.clamp(0, base),
            AmountRule::Percentage { pct } => base * i64::from(pct.min(100)) / 100,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match *self {
            AmountRule::Fixed { amount } if amount < 0 => {
                anyhow::bail!("fixed amount must not be negative: {amount}")
            }
            AmountRule::Percentage { pct } if pct > 100 => {
                anyhow::bail!("percentage must be between 0 and 100: {pct}")
            }
            _ => Ok(()),
        }
    }
}

/// Which reschedule guards apply to a given requester role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGuards {
    #[serde(default = "default_true")]
    pub advance_notice: bool,
    #[serde(default = "default_true")]
    pub frequency_limit: bool,
    #[serde(default = "default_true")]
    pub charge_fee: bool,
}

impl RoleGuards {
    pub const ALL: RoleGuards = RoleGuards {
        advance_notice: true,
        frequency_limit: true,
        charge_fee: true,
    };

    pub const NONE: RoleGuards = RoleGuards {
        advance_notice: false,
        frequency_limit: false,
        charge_fee: false,
    };
}

impl Default for RoleGuards {
    fn default() -> Self {
        RoleGuards::ALL
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReschedulePolicy {
    #[serde(default)]
    pub fee: FeeRule,
    /// `None` means unlimited.
    #[serde(default = "default_max_reschedules")]
    pub max_reschedules: Option<u32>,
    #[serde(default)]
    pub user: RoleGuards,
    #[serde(default = "default_shop_guards")]
    pub shop: RoleGuards,
    #[serde(default = "default_admin_guards")]
    pub admin: RoleGuards,
}

fn default_max_reschedules() -> Option<u32> {
    Some(3)
}

fn default_shop_guards() -> RoleGuards {
    RoleGuards {
        advance_notice: true,
        frequency_limit: false,
        charge_fee: false,
    }
}

fn default_admin_guards() -> RoleGuards {
    RoleGuards::NONE
}

impl Default for ReschedulePolicy {
    fn default() -> Self {
        Self {
            fee: FeeRule::None,
            max_reschedules: default_max_reschedules(),
            user: RoleGuards::ALL,
            shop: default_shop_guards(),
            admin: default_admin_guards(),
        }
    }
}

impl ReschedulePolicy {
    pub fn guards_for(&self, role: RequesterRole) -> RoleGuards {
        match role {
            RequesterRole::User => self.user,
            RequesterRole::Shop => self.shop,
            RequesterRole::Admin => self.admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundTier {
    pub min_hours_before: u32,
    pub percent: u32,
}

/// Elapsed-time refund schedule for customer cancellations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    pub tiers: Vec<RefundTier>,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RefundTier {
                    min_hours_before: 24,
                    percent: 100,
                },
                RefundTier {
                    min_hours_before: 3,
                    percent: 50,
                },
            ],
        }
    }
}

impl RefundPolicy {
    /// Refundable percentage when cancelling `minutes_before` the start.
    pub fn percent_for(&self, minutes_before: i64) -> u32 {
        let mut tiers = self.tiers.clone();
        tiers.sort_by(|a, b| b.min_hours_before.cmp(&a.min_hours_before));
        tiers
            .iter()
            .find(|tier| minutes_before >= i64::from(tier.min_hours_before) * 60)
            .map(|tier| tier.percent.min(100))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_rule_fixed_is_capped_by_base() {
        assert_eq!(AmountRule::Fixed { amount: 5000 }.amount_for(30000), 5000);
        assert_eq!(AmountRule::Fixed { amount: 50000 }.amount_for(30000), 30000);
        assert_eq!(AmountRule::None.amount_for(30000), 0);
    }

    #[test]
    fn test_amount_rule_percentage() {
        assert_eq!(AmountRule::Percentage { pct: 20 }.amount_for(30000), 6000);
        assert_eq!(AmountRule::Percentage { pct: 150 }.amount_for(1000), 1000);
        assert!(AmountRule::Percentage { pct: 150 }.validate().is_err());
        assert!(AmountRule::Fixed { amount: -1 }.validate().is_err());
    }

    #[test]
    fn test_amount_rule_json_is_tagged() {
        let rule: AmountRule = serde_json::from_str(r#"{"kind":"fixed","amount":1000}"#).unwrap();
        assert_eq!(rule, AmountRule::Fixed { amount: 1000 });
        let rule: AmountRule = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(rule, AmountRule::None);
    }

    #[test]
    fn test_refund_policy_tiers() {
        let policy = RefundPolicy::default();
        assert_eq!(policy.percent_for(48 * 60), 100);
        assert_eq!(policy.percent_for(24 * 60), 100);
        assert_eq!(policy.percent_for(24 * 60 - 1), 50);
        assert_eq!(policy.percent_for(3 * 60), 50);
        assert_eq!(policy.percent_for(60), 0);
        assert_eq!(policy.percent_for(-30), 0);
    }

    #[test]
    fn test_reschedule_defaults_per_role() {
        let policy = ReschedulePolicy::default();
        assert_eq!(policy.guards_for(RequesterRole::User), RoleGuards::ALL);
        assert!(policy.guards_for(RequesterRole::Shop).advance_notice);
        assert!(!policy.guards_for(RequesterRole::Shop).charge_fee);
        assert_eq!(policy.guards_for(RequesterRole::Admin), RoleGuards::NONE);
    }
}
