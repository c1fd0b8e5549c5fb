//! Read-through cache for catalog data and studio settings.
//!
//! Loaded on first use and kept until [`CatalogCache::invalidate`] is called;
//! every admin write invalidates it.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::booking::error::LookupError;
use crate::booking::steps::FlowConfig;
use crate::models::{JewelryItem, Service, StudioSettings};
use crate::store::StudioStore;

#[derive(Debug, Clone)]
pub struct Catalog {
    pub services: Vec<Service>,
    pub jewelry: Vec<JewelryItem>,
    pub settings: StudioSettings,
}

impl Catalog {
    pub fn in_stock_jewelry(&self) -> Vec<JewelryItem> {
        self.jewelry.iter().filter(|j| j.in_stock).cloned().collect()
    }

    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            ai_stylist_enabled: self.settings.ai_stylist_enabled,
        }
    }

    pub fn service(&self, id: i64) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id && s.is_active)
    }

    pub fn jewelry_item(&self, id: i64) -> Option<&JewelryItem> {
        self.jewelry.iter().find(|j| j.id == id)
    }
}

#[derive(Default)]
pub struct CatalogCache {
    inner: RwLock<Option<Arc<Catalog>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn catalog(&self, store: &dyn StudioStore) -> Result<Arc<Catalog>, LookupError> {
        if let Some(catalog) = self.inner.read().await.as_ref() {
            return Ok(catalog.clone());
        }

        let mut slot = self.inner.write().await;
        if let Some(catalog) = slot.as_ref() {
            return Ok(catalog.clone());
        }
        let catalog = Arc::new(Catalog {
            services: store.list_services().await?,
            jewelry: store.list_jewelry().await?,
            settings: store.studio_settings().await?,
        });
        tracing::debug!(
            "catalog loaded: {} services, {} jewelry items",
            catalog.services.len(),
            catalog.jewelry.len()
        );
        *slot = Some(catalog.clone());
        Ok(catalog)
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}
