use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::models::ReservationEvent;
use crate::services::booking::SlotLocks;
use crate::services::collaborators::{Catalog, NoShowOverrides, Notifier, PaymentGateway, PointLedger};

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub catalog: Arc<dyn Catalog>,
    pub payments: Arc<dyn PaymentGateway>,
    pub points: Arc<dyn PointLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub overrides: Arc<dyn NoShowOverrides>,
    pub slot_locks: SlotLocks,
    pub events_tx: broadcast::Sender<ReservationEvent>,
}

impl AppState {
    pub fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database mutex poisoned")))
    }
}
