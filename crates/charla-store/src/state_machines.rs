//! Tenant state-machine definitions, state entry messages, and named
//! follow-up configs.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use charla_core::ids::TenantId;
use charla_machine::{Machine, StateMachineDef};

use crate::error::{Result, StoreError};
use crate::types::FollowupConfig;

pub struct StateMachineStore {
    db: Arc<Mutex<Connection>>,
}

impl StateMachineStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Store a definition. The graph is validated before anything is written,
    /// so a dangling transition never reaches the table.
    pub fn save(&self, tenant: &TenantId, def: &StateMachineDef, active: bool) -> Result<()> {
        Machine::new(def.clone())?;
        let blob = serde_json::to_string(def)?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        if active {
            // Only one active version per (tenant, name).
            db.execute(
                "UPDATE state_machines SET active = 0 WHERE tenant_id = ?1 AND name = ?2",
                rusqlite::params![tenant.as_str(), def.name],
            )?;
        }
        db.execute(
            "INSERT INTO state_machines (id, tenant_id, name, version, definition, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tenant_id, name, version) DO UPDATE SET
                 definition = excluded.definition,
                 active     = excluded.active",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                tenant.as_str(),
                def.name,
                def.version,
                blob,
                active as i64,
                now
            ],
        )?;
        Ok(())
    }

    /// Load and validate the active machine for a name.
    pub fn find_active(&self, tenant: &TenantId, name: &str) -> Result<Machine> {
        let blob = {
            let db = self.db.lock().unwrap();
            match db.query_row(
                "SELECT definition FROM state_machines
                 WHERE tenant_id = ?1 AND name = ?2 AND active = 1
                 ORDER BY version DESC LIMIT 1",
                rusqlite::params![tenant.as_str(), name],
                |row| row.get::<_, String>(0),
            ) {
                Ok(blob) => blob,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(StoreError::not_found("state machine", name));
                }
                Err(e) => return Err(StoreError::Database(e)),
            }
        };
        Ok(Machine::from_json(&blob)?)
    }

    /// Load a specific name/version; the latest version when `version` is None.
    pub fn find_by_name(&self, tenant: &TenantId, name: &str, version: Option<u32>) -> Result<Machine> {
        let blob = {
            let db = self.db.lock().unwrap();
            let result = match version {
                Some(v) => db.query_row(
                    "SELECT definition FROM state_machines
                     WHERE tenant_id = ?1 AND name = ?2 AND version = ?3",
                    rusqlite::params![tenant.as_str(), name, v],
                    |row| row.get::<_, String>(0),
                ),
                None => db.query_row(
                    "SELECT definition FROM state_machines
                     WHERE tenant_id = ?1 AND name = ?2
                     ORDER BY version DESC LIMIT 1",
                    rusqlite::params![tenant.as_str(), name],
                    |row| row.get::<_, String>(0),
                ),
            };
            match result {
                Ok(blob) => blob,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(StoreError::not_found("state machine", name));
                }
                Err(e) => return Err(StoreError::Database(e)),
            }
        };
        Ok(Machine::from_json(&blob)?)
    }

    /// Canned messages sent when a session enters a state, in position order.
    pub fn state_entry_messages(
        &self,
        tenant: &TenantId,
        machine_name: &str,
        state_id: &str,
    ) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT body FROM state_entry_messages
             WHERE tenant_id = ?1 AND machine_name = ?2 AND state_id = ?3
             ORDER BY position",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![tenant.as_str(), machine_name, state_id],
                |row| row.get::<_, String>(0),
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn set_state_entry_messages(
        &self,
        tenant: &TenantId,
        machine_name: &str,
        state_id: &str,
        bodies: &[String],
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM state_entry_messages
             WHERE tenant_id = ?1 AND machine_name = ?2 AND state_id = ?3",
            rusqlite::params![tenant.as_str(), machine_name, state_id],
        )?;
        for (i, body) in bodies.iter().enumerate() {
            db.execute(
                "INSERT INTO state_entry_messages (tenant_id, machine_name, state_id, position, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![tenant.as_str(), machine_name, state_id, i as i64, body],
            )?;
        }
        Ok(())
    }

    /// Fetch a named follow-up config for the tenant.
    pub fn get_followup_config(&self, tenant: &TenantId, name: &str) -> Result<Option<FollowupConfig>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT config FROM followup_configs WHERE tenant_id = ?1 AND name = ?2",
            rusqlite::params![tenant.as_str(), name],
            |row| row.get::<_, String>(0),
        ) {
            Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn set_followup_config(&self, tenant: &TenantId, config: &FollowupConfig) -> Result<()> {
        let blob = serde_json::to_string(config)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO followup_configs (tenant_id, name, config) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, name) DO UPDATE SET config = excluded.config",
            rusqlite::params![tenant.as_str(), config.name, blob],
        )?;
        Ok(())
    }
}
