use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use super::NoShowOverrides;

#[derive(Debug, Default)]
pub struct InMemoryOverrides {
    reservations: RwLock<HashSet<String>>,
}

impl InMemoryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reservation_id: &str) {
        if let Ok(mut set) = self.reservations.write() {
            set.insert(reservation_id.to_string());
        }
    }
}

#[async_trait]
impl NoShowOverrides for InMemoryOverrides {
    async fn has_override(&self, reservation_id: &str) -> anyhow::Result<bool> {
        let set = self
            .reservations
            .read()
            .map_err(|_| anyhow::anyhow!("override lock poisoned"))?;
        Ok(set.contains(reservation_id))
    }
}
