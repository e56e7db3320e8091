use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::result_len;
use crate::dispatch::error::HandlerError;
use crate::services::PersonnelService;

#[derive(Clone)]
pub struct PersonalHandler {
    service: Arc<dyn PersonnelService>,
}

impl PersonalHandler {
    pub fn new(service: Arc<dyn PersonnelService>) -> Self {
        PersonalHandler { service }
    }

    pub async fn person_create(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Personal Create Request");
        let result = self
            .service
            .create_person(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("create_person", e))?;
        let person_id = result.get("id").and_then(Value::as_str).unwrap_or_default();
        info!(device_sn = %device_sn, person_id, "Person Created Successfully");
        Ok(())
    }

    pub async fn person_delete(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Personal Delete Request");
        self.service
            .delete_person(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("delete_person", e))?;
        info!(device_sn = %device_sn, "Person Deleted Successfully");
        Ok(())
    }

    pub async fn person_find(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Personal Find Request");
        let result = self
            .service
            .find_person(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("find_person", e))?;
        info!(device_sn = %device_sn, count = result_len(&result), "Person Found");
        Ok(())
    }

    pub async fn white_list_sync(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Whitelist Sync Request");
        self.service
            .sync_whitelist(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("sync_whitelist", e))?;
        info!(device_sn = %device_sn, "Whitelist Synced");
        Ok(())
    }

    pub async fn white_list_find(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Whitelist Find Request");
        let result = self
            .service
            .find_whitelist(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("find_whitelist", e))?;
        info!(device_sn = %device_sn, count = result_len(&result), "Whitelist Found");
        Ok(())
    }

    pub async fn register_feats(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Register Features Request");
        self.service
            .register_features(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("register_features", e))?;
        info!(device_sn = %device_sn, "Features Registered");
        Ok(())
    }
}
