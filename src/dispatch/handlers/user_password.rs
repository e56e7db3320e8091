use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::result_len;
use crate::dispatch::error::HandlerError;
use crate::services::UserPasswordService;

#[derive(Clone)]
pub struct UserPasswordHandler {
    service: Arc<dyn UserPasswordService>,
}

impl UserPasswordHandler {
    pub fn new(service: Arc<dyn UserPasswordService>) -> Self {
        UserPasswordHandler { service }
    }

    pub async fn add(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Add User Password Request");
        self.service
            .add_password(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("add_password", e))?;
        info!(device_sn = %device_sn, "Password Added");
        Ok(())
    }

    pub async fn delete(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Delete User Password Request");
        self.service
            .delete_password(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("delete_password", e))?;
        info!(device_sn = %device_sn, "Password Deleted");
        Ok(())
    }

    pub async fn find(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Find User Password Request");
        let result = self
            .service
            .find_password(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("find_password", e))?;
        info!(device_sn = %device_sn, count = result_len(&result), "Password Found");
        Ok(())
    }
}
