//! Deposit event audit log.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use charla_core::ids::{ContactId, SessionId, TenantId};

use crate::db::parse_ts;
use crate::error::Result;
use crate::types::DepositEvent;

pub struct DepositStore {
    db: Arc<Mutex<Connection>>,
}

impl DepositStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        contact: &ContactId,
        amount: f64,
        currency: &str,
        reasoning: &str,
    ) -> Result<DepositEvent> {
        let event = DepositEvent {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant.clone(),
            session_id: session.clone(),
            contact_id: contact.clone(),
            amount,
            currency: currency.to_string(),
            reasoning: reasoning.to_string(),
            recorded_at: Utc::now(),
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO deposit_events
             (id, tenant_id, session_id, contact_id, amount, currency, reasoning, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                event.id,
                event.tenant_id.as_str(),
                event.session_id.as_str(),
                event.contact_id.as_str(),
                event.amount,
                event.currency,
                event.reasoning,
                event.recorded_at.to_rfc3339()
            ],
        )?;
        info!(tenant = %tenant, session = %session, amount, currency, "deposit recorded");
        Ok(event)
    }

    pub fn for_session(&self, tenant: &TenantId, session: &SessionId) -> Result<Vec<DepositEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, session_id, contact_id, amount, currency, reasoning, recorded_at
             FROM deposit_events
             WHERE tenant_id = ?1 AND session_id = ?2
             ORDER BY recorded_at",
        )?;
        let raws: Vec<(String, String, String, String, f64, String, String, String)> = stmt
            .query_map(rusqlite::params![tenant.as_str(), session.as_str()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        raws.into_iter()
            .map(|(id, tenant_id, session_id, contact_id, amount, currency, reasoning, recorded_at)| {
                Ok(DepositEvent {
                    id,
                    tenant_id: TenantId::from(tenant_id),
                    session_id: SessionId::from(session_id),
                    contact_id: ContactId::from(contact_id),
                    amount,
                    currency,
                    reasoning,
                    recorded_at: parse_ts("deposit_events", &recorded_at)?,
                })
            })
            .collect()
    }
}
