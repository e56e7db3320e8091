use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::TransportError;

const DEFAULT_PORT: u16 = 1883;

/// Broker connection settings.
///
/// Every field has a default so a partial `[mqtt]` table in the config file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// `mqtt://host:port`, `tcp://host:port` or plain `host[:port]`.
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Bound on a single connection attempt, handed to the reconnect loop.
    pub connect_timeout_ms: u64,
    /// Fixed pause between reconnection attempts.
    pub reconnect_interval_ms: u64,
    /// Overall guard on `connect()`; it fails with a connection timeout after this.
    pub connect_guard_ms: u64,
    pub publish_ack_timeout_ms: u64,
    pub request_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
            connect_timeout_ms: 10_000,
            reconnect_interval_ms: 1_000,
            connect_guard_ms: 15_000,
            publish_ack_timeout_ms: 10_000,
            request_capacity: 100,
            inbound_capacity: 256,
        }
    }
}

impl MqttConfig {
    /// Splits `broker_url` into host and port.
    pub fn broker_address(&self) -> Result<(String, u16), TransportError> {
        parse_broker_url(&self.broker_url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_guard(&self) -> Duration {
        Duration::from_millis(self.connect_guard_ms)
    }

    pub fn publish_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_ack_timeout_ms)
    }
}

pub fn default_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("facegate-server-{}", &id[..8])
}

fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TransportError::Configuration(format!(
                "unsupported broker scheme '{}'",
                scheme
            )))
        }
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|e| {
                TransportError::Configuration(format!("invalid broker port '{}': {}", port, e))
            })?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(TransportError::Configuration(format!(
            "missing broker host in '{}'",
            url
        )));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_broker_urls() {
        let cases = [
            ("mqtt://localhost:1883", ("localhost", 1883)),
            ("tcp://10.0.0.5:2883", ("10.0.0.5", 2883)),
            ("broker.local", ("broker.local", 1883)),
            ("mqtt://broker.local/", ("broker.local", 1883)),
        ];
        for (url, (host, port)) in cases {
            assert_eq!(parse_broker_url(url).unwrap(), (host.to_string(), port));
        }
    }

    #[test]
    fn rejects_bad_broker_urls() {
        assert!(parse_broker_url("ws://localhost:9001").is_err());
        assert!(parse_broker_url("mqtt://localhost:notaport").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }

    #[test]
    fn defaults_follow_the_connection_policy() {
        let config = MqttConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(config.connect_guard(), Duration::from_secs(15));
        assert!(config.client_id.starts_with("facegate-server-"));
        assert_eq!(config.client_id.len(), "facegate-server-".len() + 8);
    }
}
