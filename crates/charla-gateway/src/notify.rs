//! Escalation notification sink: POST the payload to the tenant's configured
//! address (ops webhook, Slack bridge, etc).

use async_trait::async_trait;

use charla_core::provider::{Notifier, ProviderError};

pub struct HttpNotifier {
    http: reqwest::Client,
}

impl HttpNotifier {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, target: &str, payload: serde_json::Value) -> Result<(), ProviderError> {
        let resp = self
            .http
            .post(target)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::Api {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
