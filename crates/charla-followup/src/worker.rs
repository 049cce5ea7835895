//! The follow-up worker pass: singleton lock, stale-claim sweep, claim,
//! render, window check, deliver, mark, schedule next.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use charla_core::config::{SESSION_WINDOW_SECS, STALE_CLAIM_SECS, WORKER_LOCK_TTL_SECS};
use charla_core::ids::MessageId;
use charla_core::message::{PlannedKind, PlannedMessage};
use charla_core::provider::OutboundChannel;
use charla_core::tenant::TenantConfig;
use charla_engine::{generate_followup, EngineContext};
use charla_store::types::{
    DeliveryStatus, Direction, FollowupItem, Session, StoredMessage,
};

use crate::error::{FollowupError, Result};
use crate::render::render_config;

pub const WORKER_LOCK_NAME: &str = "followup-worker";

/// Result of one worker pass.
#[derive(Debug, Default)]
pub struct PassStats {
    /// Another instance held the singleton lock; nothing was attempted.
    pub skipped: bool,
    pub sent: usize,
    pub failed: usize,
}

/// One bounded worker pass over every tenant's due follow-ups.
///
/// `outbound_for` resolves a tenant to its channel egress; sessions whose
/// tenant has no egress are marked failed. The pass stops when `budget`
/// elapses and relies on the next cron tick to continue.
pub async fn run_pass<C, F>(
    ctx: &C,
    tenants: &[TenantConfig],
    outbound_for: F,
    budget: std::time::Duration,
) -> Result<PassStats>
where
    C: EngineContext,
    F: Fn(&TenantConfig) -> Option<Arc<dyn OutboundChannel>>,
{
    let stores = ctx.stores();
    let mut stats = PassStats::default();

    if !stores
        .locks
        .try_acquire(WORKER_LOCK_NAME, Duration::seconds(WORKER_LOCK_TTL_SECS))?
    {
        stats.skipped = true;
        return Ok(stats);
    }

    let started = Instant::now();
    stores
        .followups
        .cleanup_stale_claims(Duration::seconds(STALE_CLAIM_SECS))?;

    'tenants: for tenant in tenants {
        let due = stores.followups.due_for_tenant(&tenant.id, Utc::now())?;
        if due.is_empty() {
            continue;
        }
        let outbound = outbound_for(tenant);
        for item in due {
            if started.elapsed() >= budget {
                break 'tenants;
            }
            if !stores.followups.claim(&item.id)? {
                continue;
            }
            match process_item(ctx, tenant, &item, outbound.as_deref()).await {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(item = %item.id, error = %e, "follow-up failed");
                    if let Err(mark_err) = stores.followups.mark_failed(&item.id, &e.to_string()) {
                        warn!(item = %item.id, error = %mark_err, "could not mark follow-up failed");
                    }
                }
            }
        }
    }

    stores.locks.release(WORKER_LOCK_NAME)?;
    info!(sent = stats.sent, failed = stats.failed, "follow-up pass complete");
    Ok(stats)
}

/// Render and deliver one claimed item, then schedule its successor.
async fn process_item<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    item: &FollowupItem,
    outbound: Option<&dyn OutboundChannel>,
) -> Result<()> {
    let stores = ctx.stores();
    let session = stores
        .sessions
        .find_by_id(&tenant.id, &item.session_id)?
        .ok_or_else(|| FollowupError::SessionGone(item.session_id.to_string()))?;
    let outbound = outbound.ok_or(FollowupError::NoOutboundChannel)?;

    // Resolve the message: registered config, or engine-generated fallback.
    let mut messages: Vec<PlannedMessage> = match &item.config_name {
        Some(name) => {
            let config = stores
                .machines
                .get_followup_config(&tenant.id, name)?
                .ok_or_else(|| FollowupError::MissingConfig(name.clone()))?;
            vec![render_config(ctx, tenant, &session, &config).await?]
        }
        None => generate_followup(ctx, tenant, &item.session_id).await?.responses,
    };

    // 24-hour window: business-initiated text outside the window must become
    // the tenant's approved fallback template.
    if session.channel.kind.enforces_session_window() {
        let idle = Utc::now() - session.last_message_at;
        if idle > Duration::seconds(SESSION_WINDOW_SECS) {
            for message in &mut messages {
                if message.kind == PlannedKind::Text {
                    let fallback = tenant
                        .followup_fallback_template
                        .clone()
                        .ok_or(FollowupError::NoFallbackTemplate)?;
                    info!(item = %item.id, template = %fallback, "24h window closed; forcing fallback template");
                    *message = PlannedMessage::template(fallback, Vec::new(), message.content.clone());
                }
            }
        }
    }

    for message in &messages {
        let receipt = outbound
            .deliver(&session.channel.user_id, message, None)
            .await?;
        let stored = StoredMessage {
            id: MessageId::new(),
            tenant_id: tenant.id.clone(),
            session_id: session.id.clone(),
            direction: Direction::Outbound,
            kind: message.kind.message_kind(),
            content: message.content.clone(),
            media_url: None,
            transcription: None,
            image_analysis: None,
            template_name: message.template_name.clone(),
            platform_message_id: Some(receipt.platform_message_id),
            delivery_status: DeliveryStatus::Sent,
            reply_to: None,
            created_at: Utc::now(),
        };
        stores.messages.save(&stored)?;
    }

    stores.followups.mark_sent(&item.id)?;
    // The item is already delivered and marked; a scheduling hiccup must not
    // flip it to failed.
    if let Err(e) = schedule_next(ctx, tenant, &session, item) {
        warn!(item = %item.id, error = %e, "next follow-up step not scheduled");
    }
    Ok(())
}

/// Queue the next step of the state's sequence, if one remains.
fn schedule_next<C: EngineContext>(
    ctx: &C,
    tenant: &TenantConfig,
    session: &Session,
    item: &FollowupItem,
) -> Result<()> {
    let stores = ctx.stores();
    let machine = stores.machines.find_active(&tenant.id, &tenant.state_machine)?;
    let Ok(state) = machine.state(&item.state) else {
        // The machine changed underneath the queue; the sequence ends here.
        return Ok(());
    };
    stores.followups.schedule(
        &tenant.id,
        &session.id,
        &item.state,
        item.sequence_index + 1,
        &state.followup_sequence,
    )?;
    Ok(())
}
