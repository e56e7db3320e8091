use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    DeviceService, EventService, PersonnelService, RecordsService, SecretService, ServiceError,
    ServiceResult, UserPasswordService,
};
use crate::config::StoreConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_sn: String,
    pub status: DeviceStatus,
    pub enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub config: Value,
    pub network_info: Value,
    pub device_info: Value,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    fn new(device_sn: &str) -> Self {
        DeviceRecord {
            device_sn: device_sn.to_string(),
            status: DeviceStatus::Unknown,
            enabled: true,
            last_heartbeat: None,
            config: json!({}),
            network_info: json!({}),
            device_info: json!({}),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    pub person_id: String,
    pub device_sn: String,
    pub name: String,
    pub id_number: String,
    pub phone: String,
    pub face_features: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationRecord {
    pub record_id: String,
    pub device_sn: String,
    pub person_id: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub event_id: String,
    pub device_sn: String,
    pub event_type: String,
    pub level: EventLevel,
    pub message: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordEntry {
    pub user_id: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    devices: HashMap<String, DeviceRecord>,
    persons: BTreeMap<String, PersonRecord>,
    records: Vec<IdentificationRecord>,
    passwords: HashMap<String, BTreeMap<String, PasswordEntry>>,
    events: VecDeque<EventLogEntry>,
}

impl StoreState {
    fn device_mut(&mut self, device_sn: &str) -> &mut DeviceRecord {
        let record = self
            .devices
            .entry(device_sn.to_string())
            .or_insert_with(|| DeviceRecord::new(device_sn));
        record.updated_at = Utc::now();
        record
    }
}

/// In-process stand-in for the relational store.
///
/// Keeps device state, persons, identification records, user passwords and a bounded event
/// log behind one `RwLock`.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    event_log_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(&StoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        MemoryStore {
            state: RwLock::new(StoreState::default()),
            event_log_capacity: config.event_log_capacity.max(1),
        }
    }

    pub async fn device(&self, device_sn: &str) -> Option<DeviceRecord> {
        self.state.read().await.devices.get(device_sn).cloned()
    }

    pub async fn person(&self, person_id: &str) -> Option<PersonRecord> {
        self.state.read().await.persons.get(person_id).cloned()
    }

    /// Oldest first.
    pub async fn events(&self) -> Vec<EventLogEntry> {
        self.state.read().await.events.iter().cloned().collect()
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    async fn log_event(
        &self,
        prefix: &str,
        device_sn: &str,
        event_type: &str,
        level: EventLevel,
        message: &str,
        details: &Value,
    ) -> String {
        let event_id = format!("{}_{}_{}", prefix, device_sn, Utc::now().timestamp_millis());
        let entry = EventLogEntry {
            event_id: event_id.clone(),
            device_sn: device_sn.to_string(),
            event_type: event_type.to_string(),
            level,
            message: message.to_string(),
            details: details.clone(),
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state.events.push_back(entry);
        while state.events.len() > self.event_log_capacity {
            state.events.pop_front();
        }
        debug!(event_id = %event_id, event_type, "Event recorded");
        event_id
    }

    async fn touch_device<F>(&self, device_sn: &str, update: F)
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut state = self.state.write().await;
        update(state.device_mut(device_sn));
    }
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn required_str<'a>(payload: &'a Value, key: &'static str) -> Result<&'a str, ServiceError> {
    str_field(payload, key).ok_or(ServiceError::MissingField(key))
}

fn date_field(payload: &Value, key: &'static str) -> Result<Option<DateTime<Utc>>, ServiceError> {
    match str_field(payload, key) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| ServiceError::InvalidField {
                field: key,
                reason: e.to_string(),
            }),
    }
}

/// Shallow merge of `patch` into `target` when both are objects, replacement otherwise.
fn merge_object(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn success() -> ServiceResult {
    Ok(json!({ "success": true }))
}

struct RecordFilter {
    device_sn: Option<String>,
    person_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl RecordFilter {
    fn from_payload(device_sn: &str, payload: &Value) -> Result<Self, ServiceError> {
        Ok(RecordFilter {
            device_sn: (!device_sn.is_empty()).then(|| device_sn.to_string()),
            person_id: str_field(payload, "personId").map(str::to_string),
            start: date_field(payload, "startDate")?,
            end: date_field(payload, "endDate")?,
        })
    }

    fn matches(&self, record: &IdentificationRecord) -> bool {
        self.device_sn
            .as_ref()
            .map_or(true, |sn| &record.device_sn == sn)
            && self
                .person_id
                .as_ref()
                .map_or(true, |id| record.person_id.as_ref() == Some(id))
            && self.start.map_or(true, |start| record.captured_at >= start)
            && self.end.map_or(true, |end| record.captured_at <= end)
    }
}

#[async_trait]
impl DeviceService for MemoryStore {
    async fn set_config(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| merge_object(&mut device.config, payload))
            .await;
        success()
    }

    async fn get_config(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        let config = self
            .device(device_sn)
            .await
            .map(|device| device.config)
            .unwrap_or_else(|| json!({}));
        Ok(json!({ "config": config }))
    }

    async fn set_network_info(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| {
            merge_object(&mut device.network_info, payload)
        })
        .await;
        success()
    }

    async fn set_time(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }

    async fn restart_device(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }

    async fn reset_device(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| {
            device.config = json!({});
            device.network_info = json!({});
        })
        .await;
        success()
    }

    async fn disable_device(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let enabled = match (
            payload.get("enabled").and_then(Value::as_bool),
            payload.get("disable").and_then(Value::as_bool),
        ) {
            (Some(enabled), _) => enabled,
            (None, Some(disable)) => !disable,
            (None, None) => false,
        };
        self.touch_device(device_sn, |device| device.enabled = enabled)
            .await;
        Ok(json!({ "success": true, "enabled": enabled }))
    }

    async fn upgrade_device(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }

    async fn device_info(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let mut state = self.state.write().await;
        let device = state.device_mut(device_sn);
        if !is_empty_payload(payload) {
            merge_object(&mut device.device_info, payload);
        }
        Ok(json!({ "info": device.device_info.clone() }))
    }

    async fn calibrate_camera(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }

    async fn remote_control(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }

    async fn extract_log(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        Ok(json!({ "logFile": null }))
    }

    async fn set_password(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |_| {}).await;
        success()
    }
}

#[async_trait]
impl PersonnelService for MemoryStore {
    async fn create_person(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let now = Utc::now();
        let person_id = str_field(payload, "personId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("person_{}", now.timestamp_millis()));
        let person = PersonRecord {
            person_id: person_id.clone(),
            device_sn: device_sn.to_string(),
            name: str_field(payload, "name").unwrap_or_default().to_string(),
            id_number: str_field(payload, "idNumber").unwrap_or_default().to_string(),
            phone: str_field(payload, "phone").unwrap_or_default().to_string(),
            face_features: payload.get("faceFeatures").cloned().unwrap_or(json!({})),
            metadata: payload.get("metadata").cloned().unwrap_or(json!({})),
            created_at: now,
            updated_at: now,
        };
        let name = person.name.clone();
        self.state.write().await.persons.insert(person_id.clone(), person);

        Ok(json!({
            "id": person_id,
            "deviceSn": device_sn,
            "name": name,
            "createdAt": now,
        }))
    }

    async fn delete_person(&self, _device_sn: &str, payload: &Value) -> ServiceResult {
        let person_id = required_str(payload, "personId")?;
        self.state.write().await.persons.remove(person_id);
        success()
    }

    async fn find_person(&self, _device_sn: &str, payload: &Value) -> ServiceResult {
        let person_id = str_field(payload, "personId");
        let name = str_field(payload, "name");
        let state = self.state.read().await;
        let found: Vec<&PersonRecord> = state
            .persons
            .values()
            .filter(|p| person_id.map_or(true, |id| p.person_id == id))
            .filter(|p| name.map_or(true, |n| p.name.contains(n)))
            .collect();
        serde_json::to_value(found).map_err(|e| ServiceError::Storage(e.to_string()))
    }

    async fn sync_whitelist(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.log_event(
            "whitelist_sync",
            device_sn,
            "whitelist_sync",
            EventLevel::Info,
            "Whitelist sync",
            payload,
        )
        .await;
        success()
    }

    async fn find_whitelist(&self, _device_sn: &str, _payload: &Value) -> ServiceResult {
        let state = self.state.read().await;
        let persons: Vec<&PersonRecord> = state.persons.values().collect();
        serde_json::to_value(persons).map_err(|e| ServiceError::Storage(e.to_string()))
    }

    async fn register_features(&self, _device_sn: &str, payload: &Value) -> ServiceResult {
        let person_id = required_str(payload, "personId")?;
        let mut state = self.state.write().await;
        let person = state
            .persons
            .get_mut(person_id)
            .ok_or_else(|| ServiceError::NotFound(format!("person {}", person_id)))?;
        person.face_features = payload.get("faceFeatures").cloned().unwrap_or(json!({}));
        person.updated_at = Utc::now();
        success()
    }
}

#[async_trait]
impl RecordsService for MemoryStore {
    async fn delete_records(&self, _device_sn: &str, payload: &Value) -> ServiceResult {
        let ids = payload
            .get("recordIds")
            .ok_or(ServiceError::MissingField("recordIds"))?
            .as_array()
            .ok_or_else(|| ServiceError::InvalidField {
                field: "recordIds",
                reason: "array required".to_string(),
            })?;
        if ids.is_empty() {
            return Ok(json!({ "deletedCount": 0 }));
        }

        let ids: Vec<String> = ids
            .iter()
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| !ids.contains(&r.record_id));
        Ok(json!({ "deletedCount": before - state.records.len() }))
    }

    async fn find_records(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let filter = RecordFilter::from_payload(device_sn, payload)?;
        let state = self.state.read().await;
        let found: Vec<&IdentificationRecord> =
            state.records.iter().filter(|r| filter.matches(r)).collect();
        serde_json::to_value(found).map_err(|e| ServiceError::Storage(e.to_string()))
    }

    /// Stores the records carried in `records` (if any), then counts what matches the filter.
    async fn report_records(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let filter = RecordFilter::from_payload(device_sn, payload)?;
        let now = Utc::now();

        let incoming: Vec<IdentificationRecord> = payload
            .get("records")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| IdentificationRecord {
                        record_id: str_field(item, "recordId").map(str::to_string).unwrap_or_else(
                            || format!("rec_{}_{}_{}", device_sn, now.timestamp_millis(), i),
                        ),
                        device_sn: device_sn.to_string(),
                        person_id: str_field(item, "personId").map(str::to_string),
                        captured_at: str_field(item, "capturedAt")
                            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or(now),
                        details: item.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut state = self.state.write().await;
        state.records.extend(incoming);
        let count = state.records.iter().filter(|r| filter.matches(r)).count();
        Ok(json!({ "recordCount": count }))
    }
}

#[async_trait]
impl EventService for MemoryStore {
    async fn record_alarm(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let id = self
            .log_event("alarm", device_sn, "alarm", EventLevel::Warning, "Alarm event", payload)
            .await;
        Ok(json!({ "alarmId": id }))
    }

    async fn record_heartbeat(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| {
            device.status = DeviceStatus::Online;
            device.last_heartbeat = Some(Utc::now());
        })
        .await;
        let id = self
            .log_event("hb", device_sn, "heartbeat", EventLevel::Info, "Heartbeat event", payload)
            .await;
        Ok(json!({ "heartbeatId": id }))
    }

    async fn record_lwt(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| device.status = DeviceStatus::Offline)
            .await;
        let id = self
            .log_event("lwt", device_sn, "lwt", EventLevel::Warning, "LWT event", payload)
            .await;
        Ok(json!({ "lwtId": id }))
    }

    async fn record_connection(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| device.status = DeviceStatus::Online)
            .await;
        let id = self
            .log_event(
                "conn",
                device_sn,
                "connection",
                EventLevel::Info,
                "Connection event",
                payload,
            )
            .await;
        Ok(json!({ "connectionId": id }))
    }

    async fn record_dcs(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let id = self
            .log_event("dcs", device_sn, "dcs", EventLevel::Info, "Door sensor event", payload)
            .await;
        Ok(json!({ "dcsId": id }))
    }

    async fn record_online_check_reply(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.touch_device(device_sn, |device| device.status = DeviceStatus::Online)
            .await;
        let id = self
            .log_event(
                "check",
                device_sn,
                "online_check_reply",
                EventLevel::Info,
                "Online check reply event",
                payload,
            )
            .await;
        Ok(json!({ "checkId": id }))
    }
}

#[async_trait]
impl UserPasswordService for MemoryStore {
    async fn add_password(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let user_id = required_str(payload, "userId")?;
        let password_hash = required_str(payload, "passwordHash")?;
        let now = Utc::now();

        let mut state = self.state.write().await;
        let entries = state.passwords.entry(device_sn.to_string()).or_default();
        entries
            .entry(user_id.to_string())
            .and_modify(|entry| {
                entry.password_hash = password_hash.to_string();
                entry.updated_at = now;
            })
            .or_insert_with(|| PasswordEntry {
                user_id: user_id.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
                updated_at: now,
            });
        success()
    }

    /// Removes one user's password when `userId` is given, otherwise every password on the
    /// device.
    async fn delete_password(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        let mut state = self.state.write().await;
        let removed = match str_field(payload, "userId") {
            Some(user_id) => state
                .passwords
                .get_mut(device_sn)
                .map_or(0, |entries| usize::from(entries.remove(user_id).is_some())),
            None => state
                .passwords
                .remove(device_sn)
                .map_or(0, |entries| entries.len()),
        };
        Ok(json!({ "success": true, "deletedCount": removed }))
    }

    async fn find_password(&self, device_sn: &str, _payload: &Value) -> ServiceResult {
        let state = self.state.read().await;
        let entries: Vec<&PasswordEntry> = state
            .passwords
            .get(device_sn)
            .map(|entries| entries.values().collect())
            .unwrap_or_default();
        serde_json::to_value(entries).map_err(|e| ServiceError::Storage(e.to_string()))
    }
}

#[async_trait]
impl SecretService for MemoryStore {
    async fn sync_secret(&self, device_sn: &str, payload: &Value) -> ServiceResult {
        self.log_event(
            "secret_sync",
            device_sn,
            "secret_sync",
            EventLevel::Info,
            "Secret sync",
            payload,
        )
        .await;
        success()
    }
}
