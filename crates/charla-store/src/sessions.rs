//! Session persistence. The `(tenant, channel kind, endpoint, user)` unique
//! constraint makes `get_or_create` race-safe: losers of a concurrent insert
//! read back the winner's row.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use charla_core::ids::{ContactId, SessionId, TenantId};
use charla_core::message::{ChannelKey, ChannelKind};

use crate::db::parse_ts;
use crate::error::{Result, StoreError};
use crate::types::{Session, SessionStatus};

pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn find_by_key(&self, tenant: &TenantId, key: &ChannelKey) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("{SELECT_SESSION} WHERE tenant_id = ?1 AND channel_kind = ?2 AND endpoint_id = ?3 AND user_id = ?4"),
            rusqlite::params![tenant.as_str(), key.kind.as_str(), key.endpoint_id, key.user_id],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_session(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn find_by_id(&self, tenant: &TenantId, id: &SessionId) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("{SELECT_SESSION} WHERE tenant_id = ?1 AND id = ?2"),
            rusqlite::params![tenant.as_str(), id.as_str()],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_session(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Return the existing session for `key` or create one in `initial_state`.
    pub fn get_or_create(
        &self,
        tenant: &TenantId,
        key: &ChannelKey,
        contact_id: &ContactId,
        initial_state: &str,
    ) -> Result<Session> {
        if let Some(session) = self.find_by_key(tenant, key)? {
            return Ok(session);
        }

        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT OR IGNORE INTO sessions
                 (id, tenant_id, contact_id, channel_kind, endpoint_id, user_id,
                  current_state, context, status, escalated, last_message_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{}', 'active', 0, ?8, ?8, ?8)",
                rusqlite::params![
                    id.as_str(),
                    tenant.as_str(),
                    contact_id.as_str(),
                    key.kind.as_str(),
                    key.endpoint_id,
                    key.user_id,
                    initial_state,
                    now
                ],
            )?;
        }
        debug!(tenant = %tenant, key = %key, "session created");

        self.find_by_key(tenant, key)?
            .ok_or_else(|| StoreError::not_found("session", key.to_string()))
    }

    /// Write back all mutable session fields.
    pub fn update(&self, session: &Session) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let context = serde_json::to_string(&session.context)?;
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE sessions SET
                current_state = ?1, previous_state = ?2, context = ?3,
                status = ?4, escalated = ?5, last_message_at = ?6, updated_at = ?7
             WHERE tenant_id = ?8 AND id = ?9",
            rusqlite::params![
                session.current_state,
                session.previous_state,
                context,
                session.status.as_str(),
                session.escalated as i64,
                session.last_message_at.to_rfc3339(),
                now,
                session.tenant_id.as_str(),
                session.id.as_str()
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("session", session.id.as_str()));
        }
        Ok(())
    }
}

const SELECT_SESSION: &str = "SELECT id, tenant_id, contact_id, channel_kind, endpoint_id, user_id,
        current_state, previous_state, context, status, escalated,
        last_message_at, created_at, updated_at
 FROM sessions";

type RawSession = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    String,
    String,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
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
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn raw_to_session(raw: RawSession) -> Result<Session> {
    let (
        id,
        tenant_id,
        contact_id,
        channel_kind,
        endpoint_id,
        user_id,
        current_state,
        previous_state,
        context,
        status,
        escalated,
        last_message_at,
        created_at,
        updated_at,
    ) = raw;

    let kind = ChannelKind::from_str(&channel_kind).map_err(|reason| StoreError::CorruptRow {
        table: "sessions",
        reason,
    })?;
    let status = SessionStatus::from_str(&status).map_err(|reason| StoreError::CorruptRow {
        table: "sessions",
        reason,
    })?;
    let context: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&context)?;

    Ok(Session {
        id: SessionId::from(id),
        tenant_id: TenantId::from(tenant_id),
        contact_id: ContactId::from(contact_id),
        channel: ChannelKey::new(kind, endpoint_id, user_id),
        current_state,
        previous_state,
        context,
        status,
        escalated: escalated != 0,
        last_message_at: parse_ts("sessions", &last_message_at)?,
        created_at: parse_ts("sessions", &created_at)?,
        updated_at: parse_ts("sessions", &updated_at)?,
    })
}
