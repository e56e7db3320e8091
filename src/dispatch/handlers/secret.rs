use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::dispatch::error::HandlerError;
use crate::services::SecretService;

#[derive(Clone)]
pub struct SecretHandler {
    service: Arc<dyn SecretService>,
}

impl SecretHandler {
    pub fn new(service: Arc<dyn SecretService>) -> Self {
        SecretHandler { service }
    }

    pub async fn secret_sync(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Secret Sync Request");
        self.service
            .sync_secret(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("sync_secret", e))?;
        info!(device_sn = %device_sn, "Secret Synced");
        Ok(())
    }
}
