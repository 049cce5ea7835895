//! Singleton worker locks: one row per named worker, reclaimable once
//! `expires_at` passes. The upsert's WHERE clause makes acquisition a single
//! atomic statement.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

pub struct WorkerLockStore {
    db: Arc<Mutex<Connection>>,
}

impl WorkerLockStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Try to take (or reclaim) the named lock for `ttl`. Returns `true` iff
    /// this caller now holds it.
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let expires = (now + ttl).to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT INTO worker_locks (id, locked_at, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET locked_at = excluded.locked_at,
                                           expires_at = excluded.expires_at
             WHERE worker_locks.expires_at < ?2",
            rusqlite::params![name, now_str, expires],
        )?;
        let acquired = n > 0;
        debug!(worker = %name, acquired, "worker lock attempt");
        Ok(acquired)
    }

    /// Release early so the next cron tick does not wait out the TTL.
    pub fn release(&self, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE worker_locks SET expires_at = ?1 WHERE id = ?2",
            rusqlite::params![now, name],
        )?;
        Ok(())
    }

    /// Seconds until the named lock expires; `None` when absent or expired.
    /// Surfaced by the health endpoint.
    pub fn remaining_secs(&self, name: &str) -> Result<Option<i64>> {
        let db = self.db.lock().unwrap();
        let expires: Option<String> = match db.query_row(
            "SELECT expires_at FROM worker_locks WHERE id = ?1",
            [name],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        drop(db);

        let Some(expires) = expires else {
            return Ok(None);
        };
        let expires = crate::db::parse_ts("worker_locks", &expires)?;
        let remaining = (expires - Utc::now()).num_seconds();
        Ok((remaining > 0).then_some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stores;

    #[test]
    fn second_acquire_fails_until_expiry() {
        let stores = Stores::open_in_memory().unwrap();
        assert!(stores.locks.try_acquire("followup-worker", Duration::seconds(60)).unwrap());
        assert!(!stores.locks.try_acquire("followup-worker", Duration::seconds(60)).unwrap());

        stores.locks.release("followup-worker").unwrap();
        assert!(stores.locks.try_acquire("followup-worker", Duration::seconds(60)).unwrap());
    }

    #[test]
    fn expired_lock_is_reclaimable() {
        let stores = Stores::open_in_memory().unwrap();
        assert!(stores.locks.try_acquire("debounce-worker", Duration::seconds(-5)).unwrap());
        assert!(stores.locks.try_acquire("debounce-worker", Duration::seconds(60)).unwrap());
    }

    #[test]
    fn locks_are_independent_per_name() {
        let stores = Stores::open_in_memory().unwrap();
        assert!(stores.locks.try_acquire("a", Duration::seconds(60)).unwrap());
        assert!(stores.locks.try_acquire("b", Duration::seconds(60)).unwrap());
        assert!(stores.locks.remaining_secs("a").unwrap().is_some());
        assert!(stores.locks.remaining_secs("missing").unwrap().is_none());
    }
}
