//! Tenant registry rows: maps (channel kind, channel id) to tenant config.
//!
//! The config blob is the serialized [`TenantConfig`]; channel routing
//! columns are denormalized so webhook lookup is one indexed query. The
//! partial unique index on active rows enforces "exactly one active tenant
//! per channel identifier".

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use charla_core::message::ChannelKind;
use charla_core::tenant::TenantConfig;

use crate::error::{Result, StoreError};

pub struct TenantStore {
    db: Arc<Mutex<Connection>>,
}

impl TenantStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Insert or replace a tenant row for every channel the config carries.
    ///
    /// A tenant with N channels gets N routing rows sharing the same config
    /// blob; `find_by_channel` resolves any of them.
    pub fn upsert(&self, config: &TenantConfig) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let blob = serde_json::to_string(config)?;
        let db = self.db.lock().unwrap();
        for channel in &config.channels {
            db.execute(
                "INSERT INTO tenants (id, channel_kind, channel_id, active, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     channel_kind = excluded.channel_kind,
                     channel_id   = excluded.channel_id,
                     config       = excluded.config,
                     updated_at   = excluded.updated_at",
                rusqlite::params![
                    format!("{}:{}", config.id, channel.channel_id),
                    channel.kind.as_str(),
                    channel.channel_id,
                    blob,
                    now
                ],
            )?;
        }
        info!(tenant = %config.id, channels = config.channels.len(), "tenant upserted");
        Ok(())
    }

    /// Resolve the active tenant owning a channel identifier.
    pub fn find_by_channel(&self, kind: ChannelKind, channel_id: &str) -> Result<Option<TenantConfig>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT config FROM tenants
             WHERE channel_kind = ?1 AND channel_id = ?2 AND active = 1",
            rusqlite::params![kind.as_str(), channel_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All active tenant configs, deduplicated by tenant id.
    pub fn list_active(&self) -> Result<Vec<TenantConfig>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT config FROM tenants WHERE active = 1")?;
        let blobs: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for blob in blobs {
            let cfg: TenantConfig = serde_json::from_str(&blob)?;
            if seen.insert(cfg.id.clone()) {
                out.push(cfg);
            }
        }
        Ok(out)
    }

    /// Deactivate all routing rows for a tenant.
    pub fn deactivate(&self, tenant_id: &str) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE tenants SET active = 0, updated_at = ?1 WHERE id LIKE ?2 || ':%'",
            rusqlite::params![now, tenant_id],
        )?;
        Ok(n)
    }
}
