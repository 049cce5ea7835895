//! Debounce buffer rows and the per-session claim protocol.
//!
//! The claim is a conditional update flipping `processing_started_at` from
//! NULL to now for every row of one session-key hash; success means at least
//! one row changed. Only one claimant can win because the column is the
//! predicate of its own update.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use charla_core::config::MAX_RETRIES;
use charla_core::ids::TenantId;
use charla_core::message::{ChannelKey, ChannelKind, NormalizedMessage};

use crate::db::{parse_opt_ts, parse_ts};
use crate::error::{Result, StoreError};
use crate::types::BufferedMessage;

pub struct MessageBufferStore {
    db: Arc<Mutex<Connection>>,
}

/// A session-key hash with pending work, as returned by the mature scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatureSession {
    pub tenant_id: TenantId,
    pub session_key_hash: String,
}

impl MessageBufferStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Buffer one inbound message and reset the timer on any prior unclaimed
    /// rows for the same session so the whole burst matures together.
    pub fn add(
        &self,
        tenant: &TenantId,
        hash: &str,
        key: &ChannelKey,
        payload: &NormalizedMessage,
        scheduled_process_at: DateTime<Utc>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let scheduled = scheduled_process_at.to_rfc3339();
        let blob = serde_json::to_string(payload)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_buffer
             (tenant_id, session_key_hash, channel_kind, endpoint_id, user_id,
              payload, received_at, scheduled_process_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                tenant.as_str(),
                hash,
                key.kind.as_str(),
                key.endpoint_id,
                key.user_id,
                blob,
                now,
                scheduled
            ],
        )?;
        let id = db.last_insert_rowid();
        let reset = db.execute(
            "UPDATE message_buffer SET scheduled_process_at = ?1
             WHERE session_key_hash = ?2 AND processing_started_at IS NULL AND id != ?3",
            rusqlite::params![scheduled, hash, id],
        )?;
        if reset > 0 {
            debug!(hash = %hash, reset, "debounce timer reset on prior rows");
        }
        Ok(id)
    }

    /// Distinct sessions whose timers have matured and which nobody holds.
    /// `endpoint` narrows the scan to one channel endpoint for sharding.
    pub fn mature_sessions(&self, now: DateTime<Utc>, endpoint: Option<&str>) -> Result<Vec<MatureSession>> {
        let now = now.to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut sql = String::from(
            "SELECT DISTINCT tenant_id, session_key_hash FROM message_buffer
             WHERE scheduled_process_at <= ?1
               AND processing_started_at IS NULL
               AND retry_count < ?2",
        );
        if endpoint.is_some() {
            sql.push_str(" AND endpoint_id = ?3");
        }
        let mut stmt = db.prepare(&sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(MatureSession {
                tenant_id: TenantId::from(row.get::<_, String>(0)?),
                session_key_hash: row.get(1)?,
            })
        };
        let rows = match endpoint {
            Some(e) => stmt.query_map(rusqlite::params![now, MAX_RETRIES, e], map)?,
            None => stmt.query_map(rusqlite::params![now, MAX_RETRIES], map)?,
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Try to take the per-session claim. Returns `true` iff this caller won.
    pub fn claim_session(&self, hash: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE message_buffer SET processing_started_at = ?1
             WHERE session_key_hash = ?2 AND processing_started_at IS NULL",
            rusqlite::params![now, hash],
        )?;
        Ok(n > 0)
    }

    /// All buffered rows for a claimed session, in received order.
    pub fn get_by_session(&self, hash: &str) -> Result<Vec<BufferedMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, session_key_hash, channel_kind, endpoint_id, user_id,
                    payload, received_at, scheduled_process_at, processing_started_at,
                    retry_count, last_error
             FROM message_buffer
             WHERE session_key_hash = ?1
             ORDER BY received_at, id",
        )?;
        let raws: Vec<RawBuffered> = stmt
            .query_map([hash], row_to_raw)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);
        raws.into_iter().map(raw_to_buffered).collect()
    }

    /// Remove drained rows after a successful turn.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let db = self.db.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM message_buffer WHERE id IN ({placeholders})");
        let n = db.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(n)
    }

    /// Release the claim, record the failure, and push the timer out 30 s so
    /// retries back off instead of re-maturing immediately. Rows whose retry
    /// budget is exhausted stay pending with the sentinel count and are
    /// skipped by the mature scan (dead letter, kept for operator review).
    pub fn mark_for_retry(&self, hash: &str, error: &str) -> Result<()> {
        let retry_at = (Utc::now() + Duration::seconds(30)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE message_buffer SET
                processing_started_at = NULL,
                retry_count = retry_count + 1,
                last_error = ?1,
                scheduled_process_at = ?2
             WHERE session_key_hash = ?3 AND processing_started_at IS NOT NULL",
            rusqlite::params![error, retry_at, hash],
        )?;
        warn!(hash = %hash, rows = n, error = %error, "buffered session marked for retry");
        Ok(())
    }

    /// Whether any unclaimed, retry-eligible rows exist for the session.
    pub fn has_pending(&self, hash: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM message_buffer
             WHERE session_key_hash = ?1 AND processing_started_at IS NULL AND retry_count < ?2",
            rusqlite::params![hash, MAX_RETRIES],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Clear claims older than `max_age` so crashed workers do not wedge a
    /// session forever.
    pub fn cleanup_stale_claims(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE message_buffer SET processing_started_at = NULL
             WHERE processing_started_at IS NOT NULL AND processing_started_at < ?1",
            [cutoff],
        )?;
        if n > 0 {
            warn!(rows = n, "stale debounce claims cleared");
        }
        Ok(n)
    }

    /// Dead-lettered sessions (retry budget exhausted), for operators.
    pub fn dead_letters(&self, tenant: &TenantId) -> Result<Vec<BufferedMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, session_key_hash, channel_kind, endpoint_id, user_id,
                    payload, received_at, scheduled_process_at, processing_started_at,
                    retry_count, last_error
             FROM message_buffer
             WHERE tenant_id = ?1 AND retry_count >= ?2
             ORDER BY received_at",
        )?;
        let raws: Vec<RawBuffered> = stmt
            .query_map(rusqlite::params![tenant.as_str(), MAX_RETRIES], row_to_raw)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);
        raws.into_iter().map(raw_to_buffered).collect()
    }
}

type RawBuffered = (
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    u32,
    Option<String>,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBuffered> {
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
    ))
}

fn raw_to_buffered(raw: RawBuffered) -> Result<BufferedMessage> {
    let (
        id,
        tenant_id,
        session_key_hash,
        channel_kind,
        endpoint_id,
        user_id,
        payload,
        received_at,
        scheduled_process_at,
        processing_started_at,
        retry_count,
        last_error,
    ) = raw;

    let kind: ChannelKind = channel_kind.parse().map_err(|reason| StoreError::CorruptRow {
        table: "message_buffer",
        reason,
    })?;

    Ok(BufferedMessage {
        id,
        tenant_id: TenantId::from(tenant_id),
        session_key_hash,
        channel: ChannelKey::new(kind, endpoint_id, user_id),
        payload: serde_json::from_str(&payload)?,
        received_at: parse_ts("message_buffer", &received_at)?,
        scheduled_process_at: parse_ts("message_buffer", &scheduled_process_at)?,
        processing_started_at: parse_opt_ts("message_buffer", processing_started_at)?,
        retry_count,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stores;
    use charla_core::message::MessageKind;

    fn payload(id: &str, text: &str) -> NormalizedMessage {
        NormalizedMessage {
            id: id.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            content: Some(text.to_string()),
            media_url: None,
            transcription: None,
            image_analysis: None,
            interactive_payload: None,
            reply_to_message_id: None,
        }
    }

    fn key() -> ChannelKey {
        ChannelKey::new(ChannelKind::Whatsapp, "pn_1", "5215550001")
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        stores
            .buffer
            .add(&tenant, "abc123", &key(), &payload("m1", "hola"), Utc::now())
            .unwrap();

        assert!(stores.buffer.claim_session("abc123").unwrap());
        assert!(!stores.buffer.claim_session("abc123").unwrap());

        stores.buffer.mark_for_retry("abc123", "llm timeout").unwrap();
        assert!(stores.buffer.claim_session("abc123").unwrap());
    }

    #[test]
    fn add_resets_timer_on_prior_rows() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let t1 = Utc::now() + Duration::seconds(3);
        stores.buffer.add(&tenant, "h", &key(), &payload("m1", "hola"), t1).unwrap();
        let t2 = Utc::now() + Duration::seconds(6);
        stores.buffer.add(&tenant, "h", &key(), &payload("m2", "soy juan"), t2).unwrap();

        let rows = stores.buffer.get_by_session("h").unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.scheduled_process_at.to_rfc3339(), t2.to_rfc3339());
        }
    }

    #[test]
    fn mature_scan_skips_claimed_and_dead_lettered() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let past = Utc::now() - Duration::seconds(1);
        stores.buffer.add(&tenant, "h1", &key(), &payload("m1", "a"), past).unwrap();
        stores.buffer.add(&tenant, "h2", &key(), &payload("m2", "b"), past).unwrap();

        let mature = stores.buffer.mature_sessions(Utc::now(), None).unwrap();
        assert_eq!(mature.len(), 2);

        stores.buffer.claim_session("h1").unwrap();
        let mature = stores.buffer.mature_sessions(Utc::now(), None).unwrap();
        assert_eq!(mature.len(), 1);
        assert_eq!(mature[0].session_key_hash, "h2");

        for _ in 0..MAX_RETRIES {
            stores.buffer.claim_session("h2").unwrap();
            stores.buffer.mark_for_retry("h2", "boom").unwrap();
        }
        assert!(stores.buffer.mature_sessions(Utc::now(), None).unwrap().is_empty());
        assert_eq!(stores.buffer.dead_letters(&tenant).unwrap().len(), 1);
    }

    #[test]
    fn stale_claims_are_swept() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        stores
            .buffer
            .add(&tenant, "h", &key(), &payload("m1", "a"), Utc::now())
            .unwrap();
        assert!(stores.buffer.claim_session("h").unwrap());

        // A zero-age sweep treats every claim as stale.
        let cleared = stores.buffer.cleanup_stale_claims(Duration::seconds(-1)).unwrap();
        assert_eq!(cleared, 1);
        assert!(stores.buffer.claim_session("h").unwrap());
    }

    #[test]
    fn drain_order_is_received_order() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        for (i, text) in ["hola", "soy juan", "cuanto cuesta?"].iter().enumerate() {
            stores
                .buffer
                .add(&tenant, "h", &key(), &payload(&format!("m{i}"), text), Utc::now())
                .unwrap();
        }
        let rows = stores.buffer.get_by_session("h").unwrap();
        let texts: Vec<_> = rows.iter().filter_map(|r| r.payload.content.clone()).collect();
        assert_eq!(texts, vec!["hola", "soy juan", "cuanto cuesta?"]);

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(stores.buffer.delete_by_ids(&ids).unwrap(), 3);
        assert!(!stores.buffer.has_pending("h").unwrap());
    }
}
