use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::result_len;
use crate::dispatch::error::HandlerError;
use crate::services::RecordsService;

#[derive(Clone)]
pub struct RecordsHandler {
    service: Arc<dyn RecordsService>,
}

impl RecordsHandler {
    pub fn new(service: Arc<dyn RecordsService>) -> Self {
        RecordsHandler { service }
    }

    pub async fn delete_records(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Delete Records Request");
        let result = self
            .service
            .delete_records(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("delete_records", e))?;
        let deleted_count = result.get("deletedCount").and_then(Value::as_u64).unwrap_or(0);
        info!(device_sn = %device_sn, deleted_count, "Records Deleted");
        Ok(())
    }

    pub async fn find_records(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Find Records Request");
        let result = self
            .service
            .find_records(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("find_records", e))?;
        info!(device_sn = %device_sn, count = result_len(&result), "Records Found");
        Ok(())
    }

    pub async fn report_records(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Report Records Request");
        let result = self
            .service
            .report_records(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("report_records", e))?;
        let record_count = result.get("recordCount").and_then(Value::as_u64).unwrap_or(0);
        info!(device_sn = %device_sn, record_count, "Records Reported");
        Ok(())
    }
}
