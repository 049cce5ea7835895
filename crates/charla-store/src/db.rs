use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Parse an RFC 3339 TEXT column back into a UTC instant.
pub(crate) fn parse_ts(table: &'static str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            reason: format!("bad timestamp '{s}': {e}"),
        })
}

pub(crate) fn parse_opt_ts(table: &'static str, s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(table, &s)).transpose()
}

/// Initialise all tables and indexes. Safe to call on every startup — uses
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_tenant_tables(conn)?;
    create_contact_tables(conn)?;
    create_session_tables(conn)?;
    create_message_tables(conn)?;
    create_buffer_table(conn)?;
    create_escalation_table(conn)?;
    create_followup_tables(conn)?;
    create_state_machine_tables(conn)?;
    create_knowledge_tables(conn)?;
    create_example_table(conn)?;
    create_deposit_table(conn)?;
    create_lock_table(conn)?;
    Ok(())
}

fn create_tenant_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id            TEXT PRIMARY KEY,
            channel_kind  TEXT NOT NULL,
            channel_id    TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            config        TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_channel
            ON tenants(channel_kind, channel_id) WHERE active = 1;",
    )?;
    Ok(())
}

fn create_contact_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contacts (
            id                TEXT PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            first_name        TEXT,
            last_name         TEXT,
            phone             TEXT,
            language          TEXT,
            registered        INTEGER NOT NULL DEFAULT 0,
            deposit_confirmed INTEGER NOT NULL DEFAULT 0,
            lifetime_value    REAL NOT NULL DEFAULT 0,
            metadata          TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_contacts_tenant
            ON contacts(tenant_id);
        CREATE TABLE IF NOT EXISTS contact_identities (
            contact_id       TEXT NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            tenant_id        TEXT NOT NULL,
            channel_kind     TEXT NOT NULL,
            channel_user_id  TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            UNIQUE(tenant_id, channel_kind, channel_user_id)
        );",
    )?;
    Ok(())
}

fn create_session_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            tenant_id       TEXT NOT NULL,
            contact_id      TEXT NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
            channel_kind    TEXT NOT NULL,
            endpoint_id     TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            current_state   TEXT NOT NULL,
            previous_state  TEXT,
            context         TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL DEFAULT 'active',
            escalated       INTEGER NOT NULL DEFAULT 0,
            last_message_at TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(tenant_id, channel_kind, endpoint_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_tenant
            ON sessions(tenant_id, last_message_at DESC);",
    )?;
    Ok(())
}

fn create_message_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            tenant_id           TEXT NOT NULL,
            session_id          TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            direction           TEXT NOT NULL,
            kind                TEXT NOT NULL,
            content             TEXT NOT NULL,
            media_url           TEXT,
            transcription       TEXT,
            image_analysis      TEXT,
            template_name       TEXT,
            platform_message_id TEXT,
            delivery_status     TEXT NOT NULL DEFAULT 'pending',
            reply_to            TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, created_at);",
    )?;
    Ok(())
}

fn create_buffer_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_buffer (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id             TEXT NOT NULL,
            session_key_hash      TEXT NOT NULL,
            channel_kind          TEXT NOT NULL,
            endpoint_id           TEXT NOT NULL,
            user_id               TEXT NOT NULL,
            payload               TEXT NOT NULL,
            received_at           TEXT NOT NULL,
            scheduled_process_at  TEXT NOT NULL,
            processing_started_at TEXT,
            retry_count           INTEGER NOT NULL DEFAULT 0,
            last_error            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_buffer_session
            ON message_buffer(session_key_hash, received_at);
        CREATE INDEX IF NOT EXISTS idx_buffer_due
            ON message_buffer(scheduled_process_at);",
    )?;
    Ok(())
}

fn create_escalation_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS escalations (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            session_id    TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            reason        TEXT NOT NULL,
            priority      TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'open',
            assigned_to   TEXT,
            ai_summary    TEXT NOT NULL DEFAULT '',
            ai_confidence REAL NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_escalations_session
            ON escalations(session_id, status);",
    )?;
    Ok(())
}

fn create_followup_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS followup_queue (
            id                    TEXT PRIMARY KEY,
            tenant_id             TEXT NOT NULL,
            session_id            TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            scheduled_at          TEXT NOT NULL,
            config_name           TEXT,
            state                 TEXT NOT NULL,
            sequence_index        INTEGER NOT NULL DEFAULT 0,
            status                TEXT NOT NULL DEFAULT 'pending',
            processing_started_at TEXT,
            sent_at               TEXT,
            retry_count           INTEGER NOT NULL DEFAULT 0,
            last_error            TEXT,
            created_at            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_followups_due
            ON followup_queue(tenant_id, status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_followups_session
            ON followup_queue(session_id, status);
        CREATE TABLE IF NOT EXISTS followup_configs (
            tenant_id TEXT NOT NULL,
            name      TEXT NOT NULL,
            config    TEXT NOT NULL,
            PRIMARY KEY (tenant_id, name)
        );",
    )?;
    Ok(())
}

fn create_state_machine_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS state_machines (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            name       TEXT NOT NULL,
            version    INTEGER NOT NULL DEFAULT 1,
            definition TEXT NOT NULL,
            active     INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(tenant_id, name, version)
        );
        CREATE TABLE IF NOT EXISTS state_entry_messages (
            tenant_id    TEXT NOT NULL,
            machine_name TEXT NOT NULL,
            state_id     TEXT NOT NULL,
            position     INTEGER NOT NULL DEFAULT 0,
            body         TEXT NOT NULL,
            PRIMARY KEY (tenant_id, machine_name, state_id, position)
        );",
    )?;
    Ok(())
}

fn create_knowledge_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_entries (
            id        TEXT PRIMARY KEY,
            title     TEXT NOT NULL,
            answer    TEXT NOT NULL,
            category  TEXT NOT NULL,
            tags      TEXT NOT NULL DEFAULT '[]',
            summary   TEXT NOT NULL DEFAULT '',
            related   TEXT NOT NULL DEFAULT '[]',
            embedding TEXT NOT NULL DEFAULT '[]',
            priority  INTEGER NOT NULL DEFAULT 0,
            active    INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS tenant_knowledge_sets (
            tenant_id TEXT NOT NULL,
            entry_id  TEXT NOT NULL REFERENCES knowledge_entries(id) ON DELETE CASCADE,
            PRIMARY KEY (tenant_id, entry_id)
        );",
    )?;
    Ok(())
}

fn create_example_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_examples (
            id            TEXT PRIMARY KEY,
            scenario      TEXT NOT NULL,
            category      TEXT NOT NULL,
            outcome       TEXT NOT NULL DEFAULT '',
            primary_state TEXT NOT NULL,
            state_flow    TEXT NOT NULL DEFAULT '[]',
            messages      TEXT NOT NULL DEFAULT '[]',
            embedding     TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_examples_state
            ON conversation_examples(primary_state);",
    )?;
    Ok(())
}

fn create_deposit_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS deposit_events (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            session_id  TEXT NOT NULL,
            contact_id  TEXT NOT NULL,
            amount      REAL NOT NULL,
            currency    TEXT NOT NULL,
            reasoning   TEXT NOT NULL DEFAULT '',
            recorded_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_lock_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS worker_locks (
            id         TEXT PRIMARY KEY,
            locked_at  TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
