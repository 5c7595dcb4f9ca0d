use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{GatewayDecision, PaymentGateway, PaymentStage};

/// What the gateway was asked to do, keyed for idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKey {
    Capture(PaymentStage),
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedIntent {
    pub reservation_id: String,
    pub key: IntentKey,
    pub amount: i64,
    pub decision: GatewayDecision,
}

#[derive(Debug, Default)]
struct GatewayState {
    intents: HashMap<(String, IntentKey), RecordedIntent>,
    order: Vec<(String, IntentKey)>,
    reject_captures: bool,
    fail_calls: bool,
}

/// In-memory gateway for tests and local runs. Repeated intents return the first decision.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline every new capture request.
    pub fn set_reject_captures(&self, reject: bool) {
        if let Ok(mut state) = self.state.write() {
            state.reject_captures = reject;
        }
    }

    /// Make every new call error out, as if the gateway were unreachable.
    pub fn set_fail_calls(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_calls = fail;
        }
    }

    pub fn intents(&self) -> Vec<RecordedIntent> {
        let Ok(state) = self.state.read() else {
            return vec![];
        };
        state
            .order
            .iter()
            .filter_map(|key| state.intents.get(key).cloned())
            .collect()
    }

    pub fn intent(&self, reservation_id: &str, key: IntentKey) -> Option<RecordedIntent> {
        self.state
            .read()
            .ok()?
            .intents
            .get(&(reservation_id.to_string(), key))
            .cloned()
    }

    fn record(&self, reservation_id: &str, key: IntentKey, amount: i64) -> anyhow::Result<GatewayDecision> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("gateway lock poisoned"))?;

        let map_key = (reservation_id.to_string(), key);
        if let Some(existing) = state.intents.get(&map_key) {
            return Ok(existing.decision.clone());
        }
        if state.fail_calls {
            anyhow::bail!("payment gateway unreachable");
        }

        let decision = match key {
            IntentKey::Capture(_) if state.reject_captures => {
                GatewayDecision::Rejected("card declined".to_string())
            }
            _ => GatewayDecision::Accepted,
        };
        state.intents.insert(
            map_key.clone(),
            RecordedIntent {
                reservation_id: reservation_id.to_string(),
                key,
                amount,
                decision: decision.clone(),
            },
        );
        state.order.push(map_key);
        Ok(decision)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn request_capture(
        &self,
        reservation_id: &str,
        stage: PaymentStage,
        amount: i64,
    ) -> anyhow::Result<GatewayDecision> {
        self.record(reservation_id, IntentKey::Capture(stage), amount)
    }

    async fn request_refund(&self, reservation_id: &str, amount: i64) -> anyhow::Result<GatewayDecision> {
        self.record(reservation_id, IntentKey::Refund, amount)
    }
}
