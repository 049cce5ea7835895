//! Typed store contracts over SQLite.
//!
//! One manager per entity family, all sharing a single connection behind a
//! `Mutex`. Tenant isolation is explicit: every operation on per-tenant data
//! takes a `TenantId` and every row carries a `tenant_id` column.

pub mod buffer;
pub mod contacts;
pub mod db;
pub mod deposits;
pub mod error;
pub mod escalations;
pub mod examples;
pub mod followups;
pub mod knowledge;
pub mod locks;
pub mod messages;
pub mod sessions;
pub mod similarity;
pub mod state_machines;
pub mod tenants;
pub mod types;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub use error::{Result, StoreError};

/// Bundle of all store managers over one shared connection.
pub struct Stores {
    pub tenants: tenants::TenantStore,
    pub contacts: contacts::ContactStore,
    pub sessions: sessions::SessionStore,
    pub messages: messages::MessageStore,
    pub buffer: buffer::MessageBufferStore,
    pub escalations: escalations::EscalationStore,
    pub followups: followups::FollowupStore,
    pub machines: state_machines::StateMachineStore,
    pub knowledge: knowledge::KnowledgeStore,
    pub examples: examples::ExampleStore,
    pub deposits: deposits::DepositStore,
    pub locks: locks::WorkerLockStore,
}

impl Stores {
    /// Wrap an already-open connection, initialising the schema (idempotent).
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            tenants: tenants::TenantStore::new(Arc::clone(&conn)),
            contacts: contacts::ContactStore::new(Arc::clone(&conn)),
            sessions: sessions::SessionStore::new(Arc::clone(&conn)),
            messages: messages::MessageStore::new(Arc::clone(&conn)),
            buffer: buffer::MessageBufferStore::new(Arc::clone(&conn)),
            escalations: escalations::EscalationStore::new(Arc::clone(&conn)),
            followups: followups::FollowupStore::new(Arc::clone(&conn)),
            machines: state_machines::StateMachineStore::new(Arc::clone(&conn)),
            knowledge: knowledge::KnowledgeStore::new(Arc::clone(&conn)),
            examples: examples::ExampleStore::new(Arc::clone(&conn)),
            deposits: deposits::DepositStore::new(Arc::clone(&conn)),
            locks: locks::WorkerLockStore::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::new(conn)
    }

    /// Fresh in-memory database, used by tests and fixtures.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}
