use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;

use charla_core::config::CharlaConfig;
use charla_core::provider::{EmbeddingProvider, LlmProvider, Notifier};
use charla_core::tenant::TenantConfig;
use charla_engine::EngineContext;
use charla_media::{FsBlobStore, MediaPipeline};
use charla_store::Stores;
use charla_whatsapp::WhatsAppClient;

use crate::notify::HttpNotifier;
use crate::providers::{HttpEmbeddingProvider, HttpLlmProvider};
use crate::registry::TenantRegistry;

/// Central shared state — passed as Arc<AppState> to all Axum handlers and
/// worker loops.
pub struct AppState {
    pub config: CharlaConfig,
    pub stores: Stores,
    pub registry: TenantRegistry,
    pub llm: HttpLlmProvider,
    pub embedder: HttpEmbeddingProvider,
    pub media: MediaPipeline,
    pub notifier: HttpNotifier,
    /// Outbound clients keyed by channel id (phone_number_id).
    clients: DashMap<String, Arc<WhatsAppClient>>,
}

impl AppState {
    pub fn new(config: CharlaConfig) -> anyhow::Result<Self> {
        let stores = Stores::open(&config.database.path)?;
        let llm = HttpLlmProvider::new(&config.llm);
        let embedder = HttpEmbeddingProvider::new(&config.llm);
        let media = MediaPipeline::new(Arc::new(FsBlobStore::new(&config.media.blob_dir)), None, None);
        Ok(Self {
            config,
            stores,
            registry: TenantRegistry::new(),
            llm,
            embedder,
            media,
            notifier: HttpNotifier::new(),
            clients: DashMap::new(),
        })
    }

    /// Outbound client for a tenant's WhatsApp channel, cached per channel id.
    pub fn whatsapp_client(&self, tenant: &TenantConfig) -> Option<Arc<WhatsAppClient>> {
        let credentials = tenant.channel(charla_core::message::ChannelKind::Whatsapp)?;
        if let Some(client) = self.clients.get(&credentials.channel_id) {
            return Some(Arc::clone(&client));
        }
        let client = Arc::new(WhatsAppClient::new(credentials, &self.config.whatsapp.api_base));
        self.clients
            .insert(credentials.channel_id.clone(), Arc::clone(&client));
        Some(client)
    }
}

impl EngineContext for AppState {
    fn stores(&self) -> &Stores {
        &self.stores
    }

    fn llm(&self) -> &dyn LlmProvider {
        &self.llm
    }

    fn embedder(&self) -> &dyn EmbeddingProvider {
        &self.embedder
    }

    fn media(&self) -> Option<&MediaPipeline> {
        Some(&self.media)
    }

    fn notifier(&self) -> Option<&dyn Notifier> {
        Some(&self.notifier)
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/webhooks/whatsapp",
            get(crate::http::webhooks::verify_handler).post(crate::http::webhooks::webhook_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
