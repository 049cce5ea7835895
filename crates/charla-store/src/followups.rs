//! Follow-up queue rows and the per-row claim protocol. Same claim discipline
//! as the debounce buffer: flip `processing_started_at` from NULL, win iff a
//! row changed.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use charla_core::ids::{FollowupId, SessionId, TenantId};
use charla_machine::{parse_interval, FollowupStep};

use crate::db::{parse_opt_ts, parse_ts};
use crate::error::{Result, StoreError};
use crate::types::{FollowupItem, FollowupStatus};

pub struct FollowupStore {
    db: Arc<Mutex<Connection>>,
}

impl FollowupStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Schedule step `index` of `state`'s sequence for the session. Returns
    /// `None` when the index is past the end of the sequence.
    pub fn schedule(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        state: &str,
        index: u32,
        steps: &[FollowupStep],
    ) -> Result<Option<FollowupId>> {
        let Some(step) = steps.get(index as usize) else {
            return Ok(None);
        };
        let interval = parse_interval(&step.interval)?;
        let id = FollowupId::new();
        let now = Utc::now();
        let scheduled_at = now + interval;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO followup_queue
             (id, tenant_id, session_id, scheduled_at, config_name, state, sequence_index,
              status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            rusqlite::params![
                id.as_str(),
                tenant.as_str(),
                session.as_str(),
                scheduled_at.to_rfc3339(),
                step.config,
                state,
                index,
                now.to_rfc3339()
            ],
        )?;
        debug!(
            tenant = %tenant,
            session = %session,
            state = %state,
            index,
            at = %scheduled_at.to_rfc3339(),
            "follow-up scheduled"
        );
        Ok(Some(id))
    }

    /// Cancel every pending follow-up for the session. Called on each inbound
    /// user reply before the turn runs.
    pub fn cancel_pending(&self, tenant: &TenantId, session: &SessionId) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE followup_queue SET status = 'cancelled'
             WHERE tenant_id = ?1 AND session_id = ?2 AND status = 'pending'",
            rusqlite::params![tenant.as_str(), session.as_str()],
        )?;
        if n > 0 {
            info!(tenant = %tenant, session = %session, cancelled = n, "pending follow-ups cancelled");
        }
        Ok(n)
    }

    /// Due items for one tenant: pending, unclaimed, scheduled in the past.
    pub fn due_for_tenant(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<Vec<FollowupItem>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_ITEM}
             WHERE tenant_id = ?1 AND status = 'pending'
               AND processing_started_at IS NULL AND scheduled_at <= ?2
             ORDER BY scheduled_at"
        ))?;
        let raws: Vec<RawItem> = stmt
            .query_map(rusqlite::params![tenant.as_str(), now.to_rfc3339()], row_to_raw)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);
        raws.into_iter().map(raw_to_item).collect()
    }

    /// Take the per-item claim. Returns `true` iff this caller won.
    pub fn claim(&self, id: &FollowupId) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE followup_queue SET processing_started_at = ?1
             WHERE id = ?2 AND status = 'pending' AND processing_started_at IS NULL",
            rusqlite::params![now, id.as_str()],
        )?;
        Ok(n > 0)
    }

    pub fn mark_sent(&self, id: &FollowupId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE followup_queue SET status = 'sent', sent_at = ?1, processing_started_at = NULL
             WHERE id = ?2",
            rusqlite::params![now, id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("follow-up", id.as_str()));
        }
        Ok(())
    }

    pub fn mark_failed(&self, id: &FollowupId, error: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE followup_queue SET status = 'failed', last_error = ?1,
                    retry_count = retry_count + 1, processing_started_at = NULL
             WHERE id = ?2",
            rusqlite::params![error, id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("follow-up", id.as_str()));
        }
        warn!(id = %id, error = %error, "follow-up marked failed");
        Ok(())
    }

    /// Clear claims older than `max_age` on still-pending items.
    pub fn cleanup_stale_claims(&self, max_age: Duration) -> Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE followup_queue SET processing_started_at = NULL
             WHERE status = 'pending' AND processing_started_at IS NOT NULL
               AND processing_started_at < ?1",
            [cutoff],
        )?;
        if n > 0 {
            warn!(rows = n, "stale follow-up claims cleared");
        }
        Ok(n)
    }

    pub fn find_by_id(&self, id: &FollowupId) -> Result<Option<FollowupItem>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("{SELECT_ITEM} WHERE id = ?1"),
            [id.as_str()],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_item(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

const SELECT_ITEM: &str = "SELECT id, tenant_id, session_id, scheduled_at, config_name, state,
        sequence_index, status, processing_started_at, sent_at, retry_count, last_error
 FROM followup_queue";

type RawItem = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    u32,
    String,
    Option<String>,
    Option<String>,
    u32,
    Option<String>,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
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

fn raw_to_item(raw: RawItem) -> Result<FollowupItem> {
    let (
        id,
        tenant_id,
        session_id,
        scheduled_at,
        config_name,
        state,
        sequence_index,
        status,
        processing_started_at,
        sent_at,
        retry_count,
        last_error,
    ) = raw;
    let status = FollowupStatus::from_str(&status).map_err(|reason| StoreError::CorruptRow {
        table: "followup_queue",
        reason,
    })?;
    Ok(FollowupItem {
        id: FollowupId::from(id),
        tenant_id: TenantId::from(tenant_id),
        session_id: SessionId::from(session_id),
        scheduled_at: parse_ts("followup_queue", &scheduled_at)?,
        config_name,
        state,
        sequence_index,
        status,
        processing_started_at: parse_opt_ts("followup_queue", processing_started_at)?,
        sent_at: parse_opt_ts("followup_queue", sent_at)?,
        retry_count,
        last_error,
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

    fn steps() -> Vec<FollowupStep> {
        vec![
            FollowupStep {
                interval: "2h".into(),
                config: Some("nudge_price".into()),
            },
            FollowupStep {
                interval: "1d".into(),
                config: None,
            },
        ]
    }

    #[test]
    fn schedule_computes_scheduled_at_from_interval() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);

        let id = stores
            .followups
            .schedule(&tenant, &sid, "pitching_12x", 0, &steps())
            .unwrap()
            .unwrap();
        let item = stores.followups.find_by_id(&id).unwrap().unwrap();
        assert_eq!(item.config_name.as_deref(), Some("nudge_price"));
        assert_eq!(item.sequence_index, 0);
        let lead = item.scheduled_at - Utc::now();
        assert!(lead > Duration::minutes(119) && lead <= Duration::hours(2));
    }

    #[test]
    fn schedule_past_end_of_sequence_is_none() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);
        assert!(stores
            .followups
            .schedule(&tenant, &sid, "pitching_12x", 2, &steps())
            .unwrap()
            .is_none());
    }

    #[test]
    fn due_claim_sent_lifecycle() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);
        let quick = vec![FollowupStep {
            interval: "1s".into(),
            config: None,
        }];
        let id = stores
            .followups
            .schedule(&tenant, &sid, "closing", 0, &quick)
            .unwrap()
            .unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let due = stores.followups.due_for_tenant(&tenant, later).unwrap();
        assert_eq!(due.len(), 1);

        assert!(stores.followups.claim(&id).unwrap());
        assert!(!stores.followups.claim(&id).unwrap());
        assert!(stores.followups.due_for_tenant(&tenant, later).unwrap().is_empty());

        stores.followups.mark_sent(&id).unwrap();
        let item = stores.followups.find_by_id(&id).unwrap().unwrap();
        assert_eq!(item.status, FollowupStatus::Sent);
        assert!(item.sent_at.is_some());
        assert!(item.processing_started_at.is_none());
    }

    #[test]
    fn cancel_pending_only_touches_pending() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let sid = session(&stores, &tenant);
        let quick = vec![
            FollowupStep {
                interval: "1s".into(),
                config: None,
            },
            FollowupStep {
                interval: "1s".into(),
                config: None,
            },
        ];
        let a = stores.followups.schedule(&tenant, &sid, "s", 0, &quick).unwrap().unwrap();
        stores.followups.schedule(&tenant, &sid, "s", 1, &quick).unwrap().unwrap();
        stores.followups.claim(&a).unwrap();
        stores.followups.mark_sent(&a).unwrap();

        assert_eq!(stores.followups.cancel_pending(&tenant, &sid).unwrap(), 1);
        let sent = stores.followups.find_by_id(&a).unwrap().unwrap();
        assert_eq!(sent.status, FollowupStatus::Sent);
    }
}
