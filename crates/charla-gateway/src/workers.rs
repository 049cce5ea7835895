//! Background worker loops: debounce drain and follow-up delivery. Both are
//! gated by TTL lock rows so extra gateway instances stay idle, and both
//! exit cleanly on the shutdown watch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use charla_core::config::{STALE_CLAIM_SECS, WORKER_LOCK_TTL_SECS};
use charla_core::provider::OutboundChannel;
use charla_debounce::process_pending;
use charla_engine::EngineContext;

use crate::app::AppState;
use crate::deliver::deliver_responses;

pub const DEBOUNCE_LOCK_NAME: &str = "debounce-worker";
/// Wall-clock bound for one debounce pass.
const DEBOUNCE_PASS_BUDGET: Duration = Duration::from_secs(25);
/// Re-run delay when a pass left matured work behind.
const DEBOUNCE_RERUN_DELAY: Duration = Duration::from_secs(3);
/// Wall-clock bound for one follow-up pass.
const FOLLOWUP_PASS_BUDGET: Duration = Duration::from_secs(60);

/// Debounce drain loop: claim matured sessions, run the engine over each
/// aggregated burst, deliver the responses. Re-runs after a short delay when
/// work remains, otherwise sleeps the poll interval.
pub async fn run_debounce_worker(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    info!("debounce worker started");
    let poll = Duration::from_secs(state.config.workers.debounce_poll_secs.max(1));
    loop {
        let delay = match debounce_pass(&state).await {
            Ok(true) => DEBOUNCE_RERUN_DELAY,
            Ok(false) => poll,
            Err(e) => {
                error!("debounce pass error: {e}");
                poll
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("debounce worker shutting down");
                    break;
                }
            }
        }
    }
}

/// One bounded debounce pass. Returns `true` when matured work remains.
async fn debounce_pass(state: &Arc<AppState>) -> anyhow::Result<bool> {
    let stores = state.stores();
    if !stores
        .locks
        .try_acquire(DEBOUNCE_LOCK_NAME, chrono::Duration::seconds(WORKER_LOCK_TTL_SECS))?
    {
        return Ok(false);
    }

    let started = Instant::now();
    stores
        .buffer
        .cleanup_stale_claims(chrono::Duration::seconds(STALE_CLAIM_SECS))?;

    let mature = stores.buffer.mature_sessions(Utc::now(), None)?;
    for session in &mature {
        if started.elapsed() >= DEBOUNCE_PASS_BUDGET {
            break;
        }
        let Some(tenant) = state_tenant(state, &session.tenant_id) else {
            warn!(tenant = %session.tenant_id, "buffered session for unknown tenant; skipping");
            continue;
        };

        match process_pending(state.as_ref(), &tenant, &session.session_key_hash).await {
            Ok(Some(outcome)) if !outcome.responses.is_empty() => {
                match stores.sessions.find_by_id(&tenant.id, &outcome.session_id) {
                    Ok(Some(s)) => {
                        deliver_responses(state, &tenant, &s.channel.user_id, None, &outcome.responses)
                            .await;
                    }
                    Ok(None) => warn!(session = %outcome.session_id, "drained session vanished before delivery"),
                    Err(e) => warn!(session = %outcome.session_id, error = %e, "session reload failed"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(hash = %session.session_key_hash, error = %e, "drain error"),
        }
    }

    stores.locks.release(DEBOUNCE_LOCK_NAME)?;
    Ok(!stores.buffer.mature_sessions(Utc::now(), None)?.is_empty())
}

/// Cron-style follow-up loop: one `charla_followup::run_pass` per tick.
pub async fn run_followup_worker(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    info!("follow-up worker started");
    let poll = Duration::from_secs(state.config.workers.followup_poll_secs.max(1));
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = followup_pass(&state).await {
                    error!("follow-up pass error: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("follow-up worker shutting down");
                    break;
                }
            }
        }
    }
}

async fn followup_pass(state: &Arc<AppState>) -> anyhow::Result<()> {
    let tenants = state.stores().tenants.list_active()?;
    if tenants.is_empty() {
        return Ok(());
    }
    let state_for_outbound = Arc::clone(state);
    let stats = charla_followup::run_pass(
        state.as_ref(),
        &tenants,
        move |tenant| {
            state_for_outbound
                .whatsapp_client(tenant)
                .map(|c| c as Arc<dyn OutboundChannel>)
        },
        FOLLOWUP_PASS_BUDGET,
    )
    .await?;
    if !stats.skipped && (stats.sent > 0 || stats.failed > 0) {
        info!(sent = stats.sent, failed = stats.failed, "follow-up pass finished");
    }
    Ok(())
}

/// Resolve a tenant id recorded on buffer rows back to its config.
fn state_tenant(state: &Arc<AppState>, tenant_id: &charla_core::ids::TenantId) -> Option<charla_core::tenant::TenantConfig> {
    state
        .stores()
        .tenants
        .list_active()
        .ok()?
        .into_iter()
        .find(|t| &t.id == tenant_id)
}
