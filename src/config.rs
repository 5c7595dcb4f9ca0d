use std::env;
use std::str::FromStr;

use crate::services::conflicts::PriorityWeights;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// JSON file with `{"shops": [...], "services": [...]}`; empty means no catalog.
    pub catalog_path: String,
    /// Where notifications are POSTed; empty means log-only.
    pub notify_webhook_url: String,
    pub slot_interval_minutes: u32,
    pub sweep_interval_secs: u64,
    pub no_show_grace_minutes: i64,
    pub requested_grace_minutes: i64,
    pub conflict_weights: PriorityWeights,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "shopbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            catalog_path: env::var("CATALOG_PATH").unwrap_or_default(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            slot_interval_minutes: parsed("SLOT_INTERVAL_MINUTES", 30),
            sweep_interval_secs: parsed("SWEEP_INTERVAL_SECS", 300),
            no_show_grace_minutes: parsed("NO_SHOW_GRACE_MINUTES", 30),
            requested_grace_minutes: parsed("REQUESTED_GRACE_MINUTES", 15),
            conflict_weights: PriorityWeights {
                payment: parsed("CONFLICT_WEIGHT_PAYMENT", 0.5),
                urgency: parsed("CONFLICT_WEIGHT_URGENCY", 0.3),
                tenure: parsed("CONFLICT_WEIGHT_TENURE", 0.2),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "changeme".to_string(),
            catalog_path: String::new(),
            notify_webhook_url: String::new(),
            slot_interval_minutes: 30,
            sweep_interval_secs: 300,
            no_show_grace_minutes: 30,
            requested_grace_minutes: 15,
            conflict_weights: PriorityWeights::default(),
        }
    }
}
