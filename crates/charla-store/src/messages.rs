//! Conversation message persistence.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use charla_core::ids::{MessageId, SessionId, TenantId};
use charla_core::message::MessageKind;

use crate::db::parse_ts;
use crate::error::{Result, StoreError};
use crate::types::{DeliveryStatus, Direction, StoredMessage};

pub struct MessageStore {
    db: Arc<Mutex<Connection>>,
}

impl MessageStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn save(&self, msg: &StoredMessage) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (id, tenant_id, session_id, direction, kind, content, media_url,
              transcription, image_analysis, template_name, platform_message_id,
              delivery_status, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                msg.id.as_str(),
                msg.tenant_id.as_str(),
                msg.session_id.as_str(),
                msg.direction.as_str(),
                msg.kind.as_str(),
                msg.content,
                msg.media_url,
                msg.transcription,
                msg.image_analysis,
                msg.template_name,
                msg.platform_message_id,
                msg.delivery_status.as_str(),
                msg.reply_to.as_ref().map(|id| id.as_str().to_string()),
                msg.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// The last `limit` messages of a session, returned in chronological
    /// order (oldest first) for prompt assembly.
    pub fn recent(&self, tenant: &TenantId, session: &SessionId, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, session_id, direction, kind, content, media_url,
                    transcription, image_analysis, template_name, platform_message_id,
                    delivery_status, reply_to, created_at
             FROM messages
             WHERE tenant_id = ?1 AND session_id = ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let raws: Vec<RawMessage> = stmt
            .query_map(
                rusqlite::params![tenant.as_str(), session.as_str(), limit as i64],
                row_to_raw,
            )?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let mut out: Vec<StoredMessage> = raws
            .into_iter()
            .map(raw_to_message)
            .collect::<Result<_>>()?;
        out.reverse();
        Ok(out)
    }

    /// Record the platform message id and delivery status after a send.
    pub fn set_delivery(
        &self,
        tenant: &TenantId,
        id: &MessageId,
        platform_message_id: Option<&str>,
        status: DeliveryStatus,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE messages SET platform_message_id = COALESCE(?1, platform_message_id),
                    delivery_status = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![platform_message_id, status.as_str(), tenant.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("message", id.as_str()));
        }
        Ok(())
    }

    /// Resolve a platform message id (e.g. a WhatsApp `wamid`) back to the
    /// stored message within one session, for reply threading.
    pub fn find_by_platform_id(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        platform_message_id: &str,
    ) -> Result<Option<MessageId>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id FROM messages
             WHERE tenant_id = ?1 AND session_id = ?2 AND platform_message_id = ?3",
            rusqlite::params![tenant.as_str(), session.as_str(), platform_message_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(id) => Ok(Some(MessageId::from(id))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

type RawMessage = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
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

fn raw_to_message(raw: RawMessage) -> Result<StoredMessage> {
    let (
        id,
        tenant_id,
        session_id,
        direction,
        kind,
        content,
        media_url,
        transcription,
        image_analysis,
        template_name,
        platform_message_id,
        delivery_status,
        reply_to,
        created_at,
    ) = raw;

    let corrupt = |reason: String| StoreError::CorruptRow {
        table: "messages",
        reason,
    };

    Ok(StoredMessage {
        id: MessageId::from(id),
        tenant_id: TenantId::from(tenant_id),
        session_id: SessionId::from(session_id),
        direction: Direction::from_str(&direction).map_err(corrupt)?,
        kind: MessageKind::from_str(&kind).map_err(corrupt)?,
        content,
        media_url,
        transcription,
        image_analysis,
        template_name,
        platform_message_id,
        delivery_status: DeliveryStatus::from_str(&delivery_status).map_err(corrupt)?,
        reply_to: reply_to.map(MessageId::from),
        created_at: parse_ts("messages", &created_at)?,
    })
}
