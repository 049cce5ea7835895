//! Channel-id → tenant resolution with a read-through cache.

use dashmap::DashMap;

use charla_core::message::ChannelKind;
use charla_core::tenant::TenantConfig;
use charla_store::{Result, Stores};

pub struct TenantRegistry {
    cache: DashMap<(ChannelKind, String), TenantConfig>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Resolve the active tenant owning a channel identifier. Store lookups
    /// populate the cache; config edits call `invalidate`.
    pub fn resolve(
        &self,
        stores: &Stores,
        kind: ChannelKind,
        channel_id: &str,
    ) -> Result<Option<TenantConfig>> {
        let cache_key = (kind, channel_id.to_string());
        if let Some(tenant) = self.cache.get(&cache_key) {
            return Ok(Some(tenant.clone()));
        }
        let Some(tenant) = stores.tenants.find_by_channel(kind, channel_id)? else {
            return Ok(None);
        };
        self.cache.insert(cache_key, tenant.clone());
        Ok(Some(tenant))
    }

    pub fn invalidate(&self, kind: ChannelKind, channel_id: &str) {
        self.cache.remove(&(kind, channel_id.to_string()));
    }
}
