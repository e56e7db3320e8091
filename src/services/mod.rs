//! # Business-logic collaborators
//!
//! One trait per domain. Handlers call these and nothing else; persistence lives behind them.
//! Every operation takes the device serial plus the decoded payload and returns a JSON result
//! object, or a [`ServiceError`] the router logs and drops.
//!
//! [`memory::MemoryStore`] implements all six traits in-process and is what the binary wires
//! in. A relational implementation only needs to provide the same traits.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type ServiceResult = Result<Value, ServiceError>;

#[async_trait]
pub trait DeviceService: Send + Sync {
    async fn set_config(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn get_config(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn set_network_info(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn set_time(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn restart_device(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn reset_device(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn disable_device(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn upgrade_device(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn device_info(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn calibrate_camera(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn remote_control(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn extract_log(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn set_password(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

/// Persons, whitelists and face features.
#[async_trait]
pub trait PersonnelService: Send + Sync {
    async fn create_person(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn delete_person(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn find_person(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn sync_whitelist(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn find_whitelist(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn register_features(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

/// Identification records captured by the terminals.
#[async_trait]
pub trait RecordsService: Send + Sync {
    async fn delete_records(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn find_records(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn report_records(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

#[async_trait]
pub trait EventService: Send + Sync {
    async fn record_alarm(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn record_heartbeat(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn record_lwt(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn record_connection(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn record_dcs(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn record_online_check_reply(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

#[async_trait]
pub trait UserPasswordService: Send + Sync {
    async fn add_password(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn delete_password(&self, device_sn: &str, payload: &Value) -> ServiceResult;
    async fn find_password(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

/// Dynamic door-code secrets.
#[async_trait]
pub trait SecretService: Send + Sync {
    async fn sync_secret(&self, device_sn: &str, payload: &Value) -> ServiceResult;
}

/// The full set of collaborators the handlers need.
#[derive(Clone)]
pub struct Services {
    pub device: Arc<dyn DeviceService>,
    pub personnel: Arc<dyn PersonnelService>,
    pub records: Arc<dyn RecordsService>,
    pub events: Arc<dyn EventService>,
    pub user_passwords: Arc<dyn UserPasswordService>,
    pub secrets: Arc<dyn SecretService>,
}

impl Services {
    /// Uses one object for every domain.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: DeviceService
            + PersonnelService
            + RecordsService
            + EventService
            + UserPasswordService
            + SecretService
            + 'static,
    {
        Services {
            device: shared.clone(),
            personnel: shared.clone(),
            records: shared.clone(),
            events: shared.clone(),
            user_passwords: shared.clone(),
            secrets: shared,
        }
    }
}
