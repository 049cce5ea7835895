//! Contacts and their channel identities.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use charla_core::ids::{ContactId, TenantId};
use charla_core::message::ChannelKind;

use crate::db::parse_ts;
use crate::error::{Result, StoreError};
use crate::types::Contact;

pub struct ContactStore {
    db: Arc<Mutex<Connection>>,
}

impl ContactStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Resolve a channel user to a contact, creating both the contact and its
    /// identity row when absent.
    ///
    /// The `(tenant, channel kind, channel user id)` unique constraint makes
    /// this idempotent: a concurrent insert loses the race, and the loser
    /// reads back the winner's row.
    pub fn find_or_create_by_channel_user(
        &self,
        tenant: &TenantId,
        kind: ChannelKind,
        channel_user_id: &str,
        display_name: Option<&str>,
    ) -> Result<Contact> {
        if let Some(contact) = self.find_by_channel_user(tenant, kind, channel_user_id)? {
            return Ok(contact);
        }

        let id = ContactId::new();
        let now = Utc::now().to_rfc3339();
        // WhatsApp user ids are phone numbers; keep the phone column in sync.
        let phone = match kind {
            ChannelKind::Whatsapp => Some(channel_user_id),
        };
        let (first, last) = split_name(display_name);

        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO contacts
                 (id, tenant_id, first_name, last_name, phone, registered, deposit_confirmed,
                  lifetime_value, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, '{}', ?6, ?6)",
                rusqlite::params![id.as_str(), tenant.as_str(), first, last, phone, now],
            )?;
            let inserted = db.execute(
                "INSERT OR IGNORE INTO contact_identities
                 (contact_id, tenant_id, channel_kind, channel_user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), tenant.as_str(), kind.as_str(), channel_user_id, now],
            )?;
            if inserted == 0 {
                // Lost the race: another caller created the identity first.
                // Drop our orphan contact row and fall through to the re-read.
                db.execute("DELETE FROM contacts WHERE id = ?1", [id.as_str()])?;
            }
        }

        debug!(tenant = %tenant, channel_user = %channel_user_id, "contact resolved");
        self.find_by_channel_user(tenant, kind, channel_user_id)?
            .ok_or_else(|| StoreError::not_found("contact", channel_user_id))
    }

    pub fn find_by_channel_user(
        &self,
        tenant: &TenantId,
        kind: ChannelKind,
        channel_user_id: &str,
    ) -> Result<Option<Contact>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT c.id, c.tenant_id, c.first_name, c.last_name, c.phone, c.language,
                    c.registered, c.deposit_confirmed, c.lifetime_value, c.metadata,
                    c.created_at, c.updated_at
             FROM contacts c
             JOIN contact_identities ci ON ci.contact_id = c.id
             WHERE ci.tenant_id = ?1 AND ci.channel_kind = ?2 AND ci.channel_user_id = ?3",
            rusqlite::params![tenant.as_str(), kind.as_str(), channel_user_id],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_contact(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn find_by_id(&self, tenant: &TenantId, id: &ContactId) -> Result<Option<Contact>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, tenant_id, first_name, last_name, phone, language,
                    registered, deposit_confirmed, lifetime_value, metadata,
                    created_at, updated_at
             FROM contacts WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id.as_str()],
            row_to_raw,
        ) {
            Ok(raw) => Ok(Some(raw_to_contact(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Write back the mutable fields of a contact.
    pub fn update(&self, contact: &Contact) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&contact.metadata)?;
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE contacts SET
                first_name = ?1, last_name = ?2, phone = ?3, language = ?4,
                registered = ?5, deposit_confirmed = ?6, lifetime_value = ?7,
                metadata = ?8, updated_at = ?9
             WHERE tenant_id = ?10 AND id = ?11",
            rusqlite::params![
                contact.first_name,
                contact.last_name,
                contact.phone,
                contact.language,
                contact.registered as i64,
                contact.deposit_confirmed as i64,
                contact.lifetime_value,
                metadata,
                now,
                contact.tenant_id.as_str(),
                contact.id.as_str()
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("contact", contact.id.as_str()));
        }
        Ok(())
    }

    /// Record a confirmed deposit on the contact: flag plus lifetime value.
    pub fn confirm_deposit(&self, tenant: &TenantId, id: &ContactId, amount: f64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE contacts SET
                deposit_confirmed = 1,
                lifetime_value = lifetime_value + ?1,
                updated_at = ?2
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![amount, now, tenant.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("contact", id.as_str()));
        }
        Ok(())
    }

    /// Delete a contact; sessions and identities cascade.
    pub fn delete(&self, tenant: &TenantId, id: &ContactId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM contacts WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("contact", id.as_str()));
        }
        Ok(())
    }
}

type RawContact = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
    f64,
    String,
    String,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawContact> {
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

fn raw_to_contact(raw: RawContact) -> Result<Contact> {
    let (
        id,
        tenant_id,
        first_name,
        last_name,
        phone,
        language,
        registered,
        deposit_confirmed,
        lifetime_value,
        metadata,
        created_at,
        updated_at,
    ) = raw;
    Ok(Contact {
        id: ContactId::from(id),
        tenant_id: TenantId::from(tenant_id),
        first_name,
        last_name,
        phone,
        language,
        registered: registered != 0,
        deposit_confirmed: deposit_confirmed != 0,
        lifetime_value,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_ts("contacts", &created_at)?,
        updated_at: parse_ts("contacts", &updated_at)?,
    })
}

/// Split a platform display name into first/last on the first space.
fn split_name(display: Option<&str>) -> (Option<String>, Option<String>) {
    match display.map(str::trim) {
        Some(name) if !name.is_empty() => match name.split_once(' ') {
            Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
            None => (Some(name.to_string()), None),
        },
        _ => (None, None),
    }
}
