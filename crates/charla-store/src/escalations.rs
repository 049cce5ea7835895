//! Escalation records. At most one non-terminal escalation per session:
//! `create` is idempotent and returns the existing active row's id.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use charla_core::ids::{EscalationId, SessionId, TenantId};

use crate::db::parse_ts;
use crate::error::{Result, StoreError};
use crate::types::{Escalation, EscalationPriority, EscalationReason, EscalationStatus};

pub struct EscalationStore {
    db: Arc<Mutex<Connection>>,
}

impl EscalationStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create an escalation for the session, or return the id of the active
    /// one if it already exists.
    pub fn create(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        reason: EscalationReason,
        priority: EscalationPriority,
        ai_summary: &str,
        ai_confidence: f64,
    ) -> Result<EscalationId> {
        if let Some(existing) = self.active_id(tenant, session)? {
            return Ok(existing);
        }

        let id = EscalationId::new();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO escalations
             (id, tenant_id, session_id, reason, priority, status, ai_summary, ai_confidence,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6, ?7, ?8, ?8)",
            rusqlite::params![
                id.as_str(),
                tenant.as_str(),
                session.as_str(),
                reason.as_str(),
                priority.as_str(),
                ai_summary,
                ai_confidence,
                now
            ],
        )?;
        info!(tenant = %tenant, session = %session, reason = reason.as_str(), "escalation created");
        Ok(id)
    }

    /// Whether the session currently has an open/assigned/in-progress escalation.
    pub fn has_active(&self, tenant: &TenantId, session: &SessionId) -> Result<bool> {
        Ok(self.active_id(tenant, session)?.is_some())
    }

    fn active_id(&self, tenant: &TenantId, session: &SessionId) -> Result<Option<EscalationId>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id FROM escalations
             WHERE tenant_id = ?1 AND session_id = ?2
               AND status IN ('open', 'assigned', 'in_progress')
             LIMIT 1",
            rusqlite::params![tenant.as_str(), session.as_str()],
            |row| row.get::<_, String>(0),
        ) {
            Ok(id) => Ok(Some(EscalationId::from(id))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Move an escalation through its lifecycle, optionally recording the
    /// assignee.
    pub fn set_status(
        &self,
        tenant: &TenantId,
        id: &EscalationId,
        status: EscalationStatus,
        assigned_to: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE escalations SET status = ?1,
                    assigned_to = COALESCE(?2, assigned_to),
                    updated_at = ?3
             WHERE tenant_id = ?4 AND id = ?5",
            rusqlite::params![status.as_str(), assigned_to, now, tenant.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("escalation", id.as_str()));
        }
        Ok(())
    }

    pub fn find_by_id(&self, tenant: &TenantId, id: &EscalationId) -> Result<Option<Escalation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, tenant_id, session_id, reason, priority, status, assigned_to,
                    ai_summary, ai_confidence, created_at, updated_at
             FROM escalations WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id.as_str()],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_escalation(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

type RawEscalation = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    f64,
    String,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEscalation> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn raw_to_escalation(raw: RawEscalation) -> Result<Escalation> {
    let (id, tenant_id, session_id, reason, priority, status, assigned_to, ai_summary, ai_confidence, created_at, updated_at) =
        raw;
    let corrupt = |reason: String| StoreError::CorruptRow {
        table: "escalations",
        reason,
    };
    Ok(Escalation {
        id: EscalationId::from(id),
        tenant_id: TenantId::from(tenant_id),
        session_id: SessionId::from(session_id),
        reason: EscalationReason::from_str(&reason).map_err(corrupt)?,
        priority: EscalationPriority::from_str(&priority).map_err(corrupt)?,
        status: EscalationStatus::from_str(&status).map_err(corrupt)?,
        assigned_to,
        ai_summary,
        ai_confidence,
        created_at: parse_ts("escalations", &created_at)?,
        updated_at: parse_ts("escalations", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stores;
    use charla_core::message::{ChannelKey, ChannelKind};

    fn session(stores: &Stores, tenant: &TenantId) -> SessionId {
        let contact = stores
            .contacts
            .find_or_create_by_channel_user(tenant, ChannelKind::Whatsapp, "555", None)
            .unwrap();
        let key = ChannelKey::new(ChannelKind::Whatsapp, "pn", "555");
        stores
            .sessions
            .get_or_create(tenant, &key, &contact.id, "greeting")
            .unwrap()
            .id
    }

    #[test]
    fn create_is_idempotent_while_active() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);

        let a = stores
            .escalations
            .create(&tenant, &sid, EscalationReason::ExplicitRequest, EscalationPriority::High, "wants human", 0.95)
            .unwrap();
        let b = stores
            .escalations
            .create(&tenant, &sid, EscalationReason::AiUncertainty, EscalationPriority::Medium, "second", 0.4)
            .unwrap();
        assert_eq!(a, b);

        let e = stores.escalations.find_by_id(&tenant, &a).unwrap().unwrap();
        assert_eq!(e.reason, EscalationReason::ExplicitRequest);
        assert!(stores.escalations.has_active(&tenant, &sid).unwrap());
    }

    #[test]
    fn resolving_allows_a_new_escalation() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);

        let a = stores
            .escalations
            .create(&tenant, &sid, EscalationReason::ExplicitRequest, EscalationPriority::High, "x", 0.9)
            .unwrap();
        stores
            .escalations
            .set_status(&tenant, &a, EscalationStatus::Resolved, Some("agent-7"))
            .unwrap();
        assert!(!stores.escalations.has_active(&tenant, &sid).unwrap());

        let b = stores
            .escalations
            .create(&tenant, &sid, EscalationReason::RepeatedFailure, EscalationPriority::Low, "y", 0.5)
            .unwrap();
        assert_ne!(a, b);
    }
}
