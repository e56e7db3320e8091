use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dispatch::error::HandlerError;
use crate::services::EventService;

/// Events the terminals raise on their own: alarms, liveness and door sensors.
#[derive(Clone)]
pub struct EventHandler {
    service: Arc<dyn EventService>,
}

impl EventHandler {
    pub fn new(service: Arc<dyn EventService>) -> Self {
        EventHandler { service }
    }

    pub async fn alarm(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        warn!(device_sn = %device_sn, payload = %payload, "Alarm Event");
        self.service
            .record_alarm(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_alarm", e))?;
        info!(device_sn = %device_sn, "Alarm Recorded");
        Ok(())
    }

    /// Heartbeats are frequent, so nothing above debug.
    pub async fn heartbeat(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        debug!(device_sn = %device_sn, "Heartbeat Event");
        self.service
            .record_heartbeat(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_heartbeat", e))?;
        Ok(())
    }

    pub async fn lwt(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        warn!(device_sn = %device_sn, "LWT Event (Last Will Testament)");
        self.service
            .record_lwt(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_lwt", e))?;
        info!(device_sn = %device_sn, "LWT Recorded");
        Ok(())
    }

    pub async fn connect(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Connection Event");
        self.service
            .record_connection(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_connection", e))?;
        info!(device_sn = %device_sn, "Connection Recorded");
        Ok(())
    }

    pub async fn dcs(&self, device_sn: String, payload: Value) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Door Sensor Status Event");
        self.service
            .record_dcs(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_dcs", e))?;
        info!(device_sn = %device_sn, "DCS Recorded");
        Ok(())
    }

    pub async fn online_check_reply(
        &self,
        device_sn: String,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(device_sn = %device_sn, "Online Check Reply");
        self.service
            .record_online_check_reply(&device_sn, &payload)
            .await
            .map_err(|e| HandlerError::service("record_online_check_reply", e))?;
        info!(device_sn = %device_sn, "Online Check Reply Recorded");
        Ok(())
    }
}
