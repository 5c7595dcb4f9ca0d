use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::Catalog;
use crate::models::{Service, Shop};

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    shops: Vec<Shop>,
    #[serde(default)]
    services: Vec<Service>,
}

/// Catalog held in memory, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    shops: RwLock<HashMap<String, Shop>>,
    services: RwLock<HashMap<String, Service>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = serde_json::from_str(json).context("invalid catalog JSON")?;
        let catalog = Self::new();
        for shop in file.shops {
            catalog.add_shop(shop)?;
        }
        for service in file.services {
            catalog.add_service(service)?;
        }
        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn add_shop(&self, shop: Shop) -> anyhow::Result<()> {
        shop.validate()?;
        self.shops
            .write()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?
            .insert(shop.id.clone(), shop);
        Ok(())
    }

    pub fn add_service(&self, service: Service) -> anyhow::Result<()> {
        service.validate()?;
        self.services
            .write()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?
            .insert(service.id.clone(), service);
        Ok(())
    }

    pub fn shop_count(&self) -> usize {
        self.shops.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_shop(&self, shop_id: &str) -> anyhow::Result<Option<Shop>> {
        let shops = self
            .shops
            .read()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        Ok(shops.get(shop_id).cloned())
    }

    async fn get_services(&self, service_ids: &[String]) -> anyhow::Result<Vec<Service>> {
        let services = self
            .services
            .read()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        Ok(service_ids
            .iter()
            .filter_map(|id| services.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "shops": [{
            "id": "shop-1",
            "name": "Hana Hair",
            "operating_hours": {"mon": {"kind": "open", "open": "10:00", "close": "18:00"}},
            "advance_policy": {"max_days_ahead": 30, "min_hours_ahead": 2}
        }],
        "services": [{
            "id": "cut",
            "shop_id": "shop-1",
            "duration_minutes": 60,
            "price": {"min": 30000, "max": 45000},
            "deposit": {"kind": "percentage", "pct": 20}
        }]
    }"#;

    #[tokio::test]
    async fn test_load_catalog_json() {
        let catalog = InMemoryCatalog::from_json(CATALOG).unwrap();
        let shop = catalog.get_shop("shop-1").await.unwrap().unwrap();
        assert_eq!(shop.advance_policy.min_hours_ahead, 2);
        assert!(catalog.get_shop("nope").await.unwrap().is_none());

        let services = catalog
            .get_services(&["cut".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].deposit_per_unit(), 6000);
    }

    #[test]
    fn test_catalog_rejects_out_of_range_deposit() {
        let json = CATALOG.replace(
            r#"{"kind": "percentage", "pct": 20}"#,
            r#"{"kind": "percentage", "pct": 120}"#,
        );
        assert!(InMemoryCatalog::from_json(&json).is_err());
    }
}
