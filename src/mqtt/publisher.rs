//! Outbound commands.
//!
//! Every command goes out as a [`CommandEnvelope`] on `20211214/cmd/<deviceSn>/<command>`. The
//! generated `requestId` is returned to the caller and is the only correlation there is: nothing
//! here waits for or matches a device reply.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::error::{PublishError, TransportResult};
use super::message_manager::{BroadcastEnvelope, CommandEnvelope, ReplyEnvelope};
use super::mqtt_handler::Transport;
use super::topics::{broadcast_topic, build_topic, command_topic, lookup, Category};

/// A command reachable by name through [`Publisher::send_by_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convenience {
    pub name: &'static str,
    pub command: &'static str,
    /// A null payload is sent as `{}`.
    pub optional_payload: bool,
}

#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Publisher { transport }
    }

    /// Wraps `payload` in a fresh envelope and publishes it to the device's command topic.
    /// Returns the envelope's `requestId`.
    pub async fn send_command(
        &self,
        device_sn: &str,
        command: &str,
        payload: Value,
    ) -> TransportResult<String> {
        let topic = command_topic(device_sn, command);
        let envelope = CommandEnvelope::new(payload);
        let message = serde_json::to_string(&envelope)?;

        self.transport.publish(&topic, message).await?;
        info!(
            topic = %topic,
            request_id = %envelope.request_id,
            "Command sent"
        );
        Ok(envelope.request_id)
    }

    pub async fn send_reply(
        &self,
        reply_topic: &str,
        payload: Value,
        success: bool,
    ) -> TransportResult<()> {
        let message = serde_json::to_string(&ReplyEnvelope::new(payload, success))?;
        self.transport.publish(reply_topic, message).await?;
        debug!(topic = %reply_topic, success, "Reply sent");
        Ok(())
    }

    /// Publishes to `20211214/event/broadcast/<command>`, which every device listens on.
    pub async fn broadcast(&self, command: &str, payload: Value) -> TransportResult<()> {
        let topic = broadcast_topic(command);
        let message = serde_json::to_string(&BroadcastEnvelope::new(payload))?;
        self.transport.publish(&topic, message).await?;
        info!(topic = %topic, "Broadcast sent");
        Ok(())
    }

    /// Sends by command name.
    ///
    /// Names in [`CONVENIENCE`] use their mapped wire command (`userPasswordAdd` goes out as
    /// `userpassword/add`); any other name is sent verbatim through [`Publisher::send_command`].
    pub async fn send_by_name(
        &self,
        device_sn: &str,
        name: &str,
        payload: Value,
    ) -> TransportResult<String> {
        match find_convenience(name) {
            Some(convenience) => self.send_convenience(device_sn, convenience, payload).await,
            None => self.send_command(device_sn, name, payload).await,
        }
    }

    /// Publishes `message` unwrapped, either to `topic_override` or to the registry template
    /// for `category`/`key` rendered for `device_sn`. Returns the topic used.
    pub async fn publish_templated(
        &self,
        device_sn: &str,
        category: &str,
        key: &str,
        message: Option<Value>,
        topic_override: Option<&str>,
    ) -> Result<String, PublishError> {
        let topic = match topic_override {
            Some(topic) => build_topic(topic, device_sn),
            None => Category::from_str(category)
                .ok()
                .and_then(|category| lookup(category, key))
                .map(|entry| entry.topic_for(device_sn))
                .ok_or_else(|| PublishError::UnknownTemplate {
                    category: category.to_string(),
                    key: key.to_string(),
                })?,
        };

        let message = serde_json::to_string(&message.unwrap_or_else(|| json!({})))
            .map_err(super::error::TransportError::from)?;
        self.transport.publish(&topic, message).await?;
        info!(topic = %topic, device_sn = %device_sn, "Device command published");
        Ok(topic)
    }

    /// Publishes a string as-is, any other JSON value serialized.
    pub async fn publish_raw(&self, topic: &str, message: Value) -> TransportResult<()> {
        let message = match message {
            Value::String(text) => text,
            other => serde_json::to_string(&other)?,
        };
        self.transport.publish(topic, message).await?;
        info!(topic = %topic, "Message published");
        Ok(())
    }

    async fn send_convenience(
        &self,
        device_sn: &str,
        convenience: &Convenience,
        payload: Value,
    ) -> TransportResult<String> {
        let payload = if convenience.optional_payload && payload.is_null() {
            json!({})
        } else {
            payload
        };
        self.send_command(device_sn, convenience.command, payload).await
    }
}

pub fn find_convenience(name: &str) -> Option<&'static Convenience> {
    CONVENIENCE.iter().find(|c| c.name == name)
}

macro_rules! convenience {
    (@optional) => { false };
    (@optional optional) => { true };
    ($($method:ident => $name:literal, $command:literal $(, $optional:ident)?;)*) => {
        /// Every command name with a dedicated method on [`Publisher`].
        pub static CONVENIENCE: &[Convenience] = &[
            $(
                Convenience {
                    name: $name,
                    command: $command,
                    optional_payload: convenience!(@optional $($optional)?),
                },
            )*
        ];

        impl Publisher {
            $(
                pub async fn $method(
                    &self,
                    device_sn: &str,
                    payload: Value,
                ) -> TransportResult<String> {
                    let convenience = Convenience {
                        name: $name,
                        command: $command,
                        optional_payload: convenience!(@optional $($optional)?),
                    };
                    self.send_convenience(device_sn, &convenience, payload).await
                }
            )*
        }
    };
}

convenience! {
    person_create => "personCreate", "personCreate";
    person_delete => "personDelete", "personDelete";
    person_find => "personFind", "personFind";
    white_list_sync => "whiteListSync", "whiteListSync";
    white_list_find => "whiteListFind", "whiteListFind";
    register_feats => "registerFeats", "registerFeats";

    delete_records => "deleteRecords", "deleteRecords";
    find_records => "findRecords", "findRecords";
    report_records => "reportRecords", "reportRecords";

    set_config => "setConfig", "setConfig";
    get_config => "getConfig", "getConfig", optional;
    set_net_info => "setNetInfo", "setNetInfo";
    set_time => "setTime", "setTime";
    restart_device => "restartDevice", "restartDevice", optional;
    device_reset => "deviceReset", "deviceReset", optional;
    device_disable => "deviceDisable", "deviceDisable";
    device_upgrade => "deviceUpgrade", "deviceUpgrade";
    device_information => "deviceInformation", "deviceInformation", optional;
    camera_calibrate => "cameraCalibrate", "cameraCalibrate";
    control => "control", "control";
    extract_log => "extractLog", "extractLog", optional;
    password => "password", "password";

    user_password_add => "userPasswordAdd", "userpassword/add";
    user_password_delete => "userPasswordDelete", "userpassword/del";
    user_password_find => "userPasswordFind", "userpassword/find", optional;

    secret_sync => "secretSync", "secretSync";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::error::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        connected: bool,
        published: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn connected() -> Arc<Self> {
            Arc::new(RecordingTransport {
                connected: true,
                ..Default::default()
            })
        }

        fn last(&self) -> (String, Value) {
            let published = self.published.lock().unwrap();
            let (topic, message) = published.last().cloned().unwrap();
            (topic, serde_json::from_str(&message).unwrap_or(Value::String(message)))
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, topic: &str, payload: String) -> TransportResult<()> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[tokio::test]
    async fn send_command_targets_device_topic_and_returns_request_id() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        let request_id = publisher
            .send_command("DEV1", "setConfig", json!({"a": 1}))
            .await
            .unwrap();

        let (topic, envelope) = transport.last();
        assert_eq!(topic, "20211214/cmd/DEV1/setConfig");
        assert!(!request_id.is_empty());
        assert_eq!(envelope["requestId"], json!(request_id));
        assert_eq!(envelope["payload"], json!({"a": 1}));
        assert!(envelope["timestamp"].as_i64().is_some());
    }

    #[tokio::test]
    async fn transport_failure_propagates_unchanged() {
        let publisher = Publisher::new(Arc::new(RecordingTransport::default()));
        let err = publisher
            .send_command("DEV1", "setConfig", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn send_by_name_maps_convenience_names_and_falls_back() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        publisher
            .send_by_name("DEV1", "userPasswordFind", Value::Null)
            .await
            .unwrap();
        let (topic, envelope) = transport.last();
        assert_eq!(topic, "20211214/cmd/DEV1/userpassword/find");
        assert_eq!(envelope["payload"], json!({}));

        publisher
            .send_by_name("DEV1", "brandNewCommand", json!({"x": true}))
            .await
            .unwrap();
        let (topic, envelope) = transport.last();
        assert_eq!(topic, "20211214/cmd/DEV1/brandNewCommand");
        assert_eq!(envelope["payload"], json!({"x": true}));
    }

    #[tokio::test]
    async fn convenience_methods_only_default_optional_payloads() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        publisher.get_config("DEV2", Value::Null).await.unwrap();
        assert_eq!(transport.last().1["payload"], json!({}));

        publisher.set_config("DEV2", Value::Null).await.unwrap();
        let (topic, envelope) = transport.last();
        assert_eq!(topic, "20211214/cmd/DEV2/setConfig");
        assert!(envelope["payload"].is_null());
    }

    #[tokio::test]
    async fn reply_and_broadcast_shapes() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        publisher
            .send_reply("20211214/cmd/personCreate_reply", json!({"id": 1}), false)
            .await
            .unwrap();
        let (topic, reply) = transport.last();
        assert_eq!(topic, "20211214/cmd/personCreate_reply");
        assert_eq!(reply["status"], "error");

        publisher.broadcast("onlineCheck", json!({})).await.unwrap();
        let (topic, message) = transport.last();
        assert_eq!(topic, "20211214/event/broadcast/onlineCheck");
        assert!(message.get("requestId").is_none());
    }

    #[tokio::test]
    async fn templated_publish_uses_registry_or_override() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        let topic = publisher
            .publish_templated("DEV3", "USERPASSWORD", "delete", None, None)
            .await
            .unwrap();
        assert_eq!(topic, "20211214/cmd/DEV3/userpassword/del");
        assert_eq!(transport.last().1, json!({}));

        let topic = publisher
            .publish_templated(
                "DEV3",
                "",
                "",
                Some(json!({"k": "v"})),
                Some("custom/{#deviceSn}/x"),
            )
            .await
            .unwrap();
        assert_eq!(topic, "custom/DEV3/x");

        let err = publisher
            .publish_templated("DEV3", "DEVICE", "selfDestruct", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::UnknownTemplate { .. }));
    }

    #[tokio::test]
    async fn raw_publish_keeps_strings_verbatim() {
        let transport = RecordingTransport::connected();
        let publisher = Publisher::new(transport.clone());

        publisher
            .publish_raw("any/topic", Value::String("hello".into()))
            .await
            .unwrap();
        assert_eq!(
            transport.published.lock().unwrap().last().unwrap().1,
            "hello"
        );
    }

    #[test]
    fn convenience_table_covers_every_device_command() {
        assert!(find_convenience("userPasswordDelete").is_some());
        assert_eq!(
            find_convenience("userPasswordDelete").unwrap().command,
            "userpassword/del"
        );
        assert!(find_convenience("heartbeat").is_none());
        assert_eq!(CONVENIENCE.len(), 26);
    }
}
