use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::PointLedger;
use crate::clock::Clock;

/// Points earned together, spent oldest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointLot {
    pub remaining: i64,
    pub earned_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
}

impl PointLot {
    fn live_at(&self, now: NaiveDateTime) -> bool {
        self.remaining > 0 && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Default)]
struct CustomerPoints {
    lots: Vec<PointLot>,
    /// reservation id -> held amount
    holds: HashMap<String, i64>,
    /// reservation id -> consumed amount
    consumed: HashMap<String, i64>,
    restored: HashSet<String>,
}

impl CustomerPoints {
    fn live_total(&self, now: NaiveDateTime) -> i64 {
        self.lots
            .iter()
            .filter(|lot| lot.live_at(now))
            .map(|lot| lot.remaining)
            .sum()
    }

    fn available(&self, now: NaiveDateTime) -> i64 {
        (self.live_total(now) - self.holds.values().sum::<i64>()).max(0)
    }

    fn debit_fifo(&mut self, mut amount: i64, now: NaiveDateTime) -> anyhow::Result<()> {
        if amount > self.live_total(now) {
            anyhow::bail!("insufficient points: need {amount}, have {}", self.live_total(now));
        }
        self.lots.sort_by_key(|lot| lot.earned_at);
        for lot in self.lots.iter_mut().filter(|lot| lot.live_at(now)) {
            if amount == 0 {
                break;
            }
            let take = lot.remaining.min(amount);
            lot.remaining -= take;
            amount -= take;
        }
        Ok(())
    }
}

/// In-memory point ledger with FIFO lots and expiry.
#[derive(Clone)]
pub struct InMemoryPointLedger {
    customers: Arc<Mutex<HashMap<String, CustomerPoints>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPointLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            customers: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub fn grant(
        &self,
        customer_id: &str,
        amount: i64,
        earned_at: NaiveDateTime,
        expires_at: Option<NaiveDateTime>,
    ) {
        if let Ok(mut customers) = self.customers.lock() {
            customers
                .entry(customer_id.to_string())
                .or_default()
                .lots
                .push(PointLot {
                    remaining: amount,
                    earned_at,
                    expires_at,
                });
        }
    }

    pub fn lots(&self, customer_id: &str) -> Vec<PointLot> {
        self.customers
            .lock()
            .ok()
            .and_then(|c| c.get(customer_id).map(|p| p.lots.clone()))
            .unwrap_or_default()
    }

    pub fn held(&self, customer_id: &str, reservation_id: &str) -> i64 {
        self.customers
            .lock()
            .ok()
            .and_then(|c| c.get(customer_id).and_then(|p| p.holds.get(reservation_id).copied()))
            .unwrap_or(0)
    }

    fn with_customer<T>(
        &self,
        customer_id: &str,
        f: impl FnOnce(&mut CustomerPoints, NaiveDateTime) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let now = self.clock.now();
        let mut customers = self
            .customers
            .lock()
            .map_err(|_| anyhow::anyhow!("point ledger lock poisoned"))?;
        f(customers.entry(customer_id.to_string()).or_default(), now)
    }
}

#[async_trait]
impl PointLedger for InMemoryPointLedger {
    async fn available_balance(&self, customer_id: &str) -> anyhow::Result<i64> {
        self.with_customer(customer_id, |points, now| Ok(points.available(now)))
    }

    async fn hold_points(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()> {
        self.with_customer(customer_id, |points, now| {
            if points.holds.contains_key(reservation_id) || points.consumed.contains_key(reservation_id) {
                return Ok(());
            }
            if amount > points.available(now) {
                anyhow::bail!("insufficient points to hold {amount}");
            }
            points.holds.insert(reservation_id.to_string(), amount);
            Ok(())
        })
    }

    async fn consume_fifo(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()> {
        self.with_customer(customer_id, |points, now| {
            if points.consumed.contains_key(reservation_id) {
                return Ok(());
            }
            let held = points.holds.remove(reservation_id).unwrap_or(0);
            if let Err(e) = points.debit_fifo(amount, now) {
                if held > 0 {
                    points.holds.insert(reservation_id.to_string(), held);
                }
                return Err(e);
            }
            points.consumed.insert(reservation_id.to_string(), amount);
            Ok(())
        })
    }

    async fn restore(&self, customer_id: &str, amount: i64, reservation_id: &str) -> anyhow::Result<()> {
        self.with_customer(customer_id, |points, now| {
            if !points.restored.insert(reservation_id.to_string()) {
                return Ok(());
            }
            if points.holds.remove(reservation_id).is_some() {
                return Ok(());
            }
            // Already spent: credit back as a fresh lot.
            if let Some(consumed) = points.consumed.remove(reservation_id) {
                points.lots.push(PointLot {
                    remaining: consumed.min(amount),
                    earned_at: now,
                    expires_at: None,
                });
            }
            Ok(())
        })
    }
}
