//! Buffer-side ingest with graceful degradation.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use charla_core::message::{ChannelKey, NormalizedMessage};
use charla_core::tenant::TenantConfig;
use charla_store::Stores;

use crate::hash::session_key_hash;

/// What happened to an inbound message at ingest time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered; a worker will drain the session at (or after) this instant.
    Buffered { scheduled_process_at: DateTime<Utc> },
    /// Debounce is disabled or degraded: the caller must process immediately.
    Immediate,
}

/// Buffer an inbound message for debounced processing.
///
/// Inserting also resets the timer on the session's earlier unclaimed rows,
/// so a burst matures as one unit `delay_ms` after its *last* message. A
/// buffer write failure degrades to immediate processing instead of dropping
/// the message.
pub fn ingest(
    stores: &Stores,
    tenant: &TenantConfig,
    key: &ChannelKey,
    msg: &NormalizedMessage,
) -> IngestOutcome {
    if !tenant.debounce.enabled {
        return IngestOutcome::Immediate;
    }

    let hash = session_key_hash(key);
    let scheduled_process_at = Utc::now() + Duration::milliseconds(tenant.debounce.delay_ms as i64);
    match stores.buffer.add(&tenant.id, &hash, key, msg, scheduled_process_at) {
        Ok(_) => IngestOutcome::Buffered {
            scheduled_process_at,
        },
        Err(e) => {
            warn!(tenant = %tenant.id, hash = %hash, error = %e, "buffer insert failed; degrading to immediate processing");
            IngestOutcome::Immediate
        }
    }
}
