//! Contracts for the systems this core talks to but does not own.

pub mod catalog;
pub mod notify;
pub mod overrides;
pub mod payment;
pub mod points;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{EventKind, Service, Shop};

pub use catalog::InMemoryCatalog;
pub use notify::{LogNotifier, WebhookNotifier};
pub use overrides::InMemoryOverrides;
pub use payment::InMemoryPaymentGateway;
pub use points::{InMemoryPointLedger, PointLot};

/// Read-only view of shops and their services.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_shop(&self, shop_id: &str) -> anyhow::Result<Option<Shop>>;

    /// Services for the given ids. Unknown ids are omitted from the result.
    async fn get_services(&self, service_ids: &[String]) -> anyhow::Result<Vec<Service>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStage {
    Deposit,
    Final,
}

impl PaymentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStage::Deposit => "deposit",
            PaymentStage::Final => "final",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayDecision {
    Accepted,
    Rejected(String),
}

/// Payment processor. Every call must be idempotent per `(reservation_id, stage)`,
/// so a retry after a timeout cannot charge or refund twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_capture(
        &self,
        reservation_id: &str,
        stage: PaymentStage,
        amount: i64,
    ) -> anyhow::Result<GatewayDecision>;

    async fn request_refund(&self, reservation_id: &str, amount: i64) -> anyhow::Result<GatewayDecision>;
}

/// Customer point balances. Holds, consumptions and restorations are keyed by
/// reservation id and are no-ops when repeated.
#[async_trait]
pub trait PointLedger: Send + Sync {
    async fn available_balance(&self, customer_id: &str) -> anyhow::Result<i64>;

    async fn hold_points(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()>;

    async fn consume_fifo(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()>;

    async fn restore(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()>;
}

/// Fire-and-forget delivery of reservation events to people.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: EventKind, reservation_id: &str) -> anyhow::Result<()>;
}

/// Admin-recorded exemptions from the automatic no-show transition.
#[async_trait]
pub trait NoShowOverrides: Send + Sync {
    async fn has_override(&self, reservation_id: &str) -> anyhow::Result<bool>;
}
