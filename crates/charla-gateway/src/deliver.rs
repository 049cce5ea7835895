//! Outbound delivery of engine responses, shared by the webhook path and the
//! debounce worker.

use std::time::Duration;

use tracing::warn;

use charla_core::provider::OutboundChannel;
use charla_core::tenant::TenantConfig;
use charla_engine::OutboundResponse;
use charla_store::types::DeliveryStatus;

use crate::app::AppState;

/// Send each response in array order, honouring per-message delays, and
/// record delivery status on the stored rows. Send failures leave the row
/// `pending` for observability; there are no retries at the send layer.
pub async fn deliver_responses(
    state: &AppState,
    tenant: &TenantConfig,
    recipient: &str,
    reply_to: Option<&str>,
    responses: &[OutboundResponse],
) {
    let Some(client) = state.whatsapp_client(tenant) else {
        warn!(tenant = %tenant.id, "no WhatsApp credentials; responses stay pending");
        return;
    };

    for response in responses {
        if let Some(delay_ms) = response.message.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay_ms.min(10_000))).await;
        }
        match client.deliver(recipient, &response.message, reply_to).await {
            Ok(receipt) => {
                if let Err(e) = state.stores.messages.set_delivery(
                    &tenant.id,
                    &response.message_id,
                    Some(&receipt.platform_message_id),
                    DeliveryStatus::Sent,
                ) {
                    warn!(message = %response.message_id, error = %e, "delivery status update failed");
                }
            }
            Err(e) => {
                warn!(
                    tenant = %tenant.id,
                    message = %response.message_id,
                    error = %e,
                    "outbound send failed; message left pending"
                );
            }
        }
    }
}
