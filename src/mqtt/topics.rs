//! Topic codec and the static command registry.
//!
//! Every topic on the wire follows
//!
//! ```text
//! <schemaVersion>/<cmd|event>/<deviceSn>/<command>[/<subcommand>]
//! ```
//!
//! The registry declares one template per recognized command. Templates carry the
//! `{#deviceSn}` placeholder in the device slot and never change while the process runs.

use std::fmt;
use std::str::FromStr;

/// Protocol generation literal, first segment of every topic.
pub const SCHEMA_VERSION: &str = "20211214";

/// Marker replaced by the device serial in topic templates.
pub const DEVICE_PLACEHOLDER: &str = "{#deviceSn}";

/// Single-level wildcard understood by the broker.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Device slot used for non-device-scoped broadcasts.
pub const BROADCAST_SEGMENT: &str = "broadcast";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Cmd,
    Event,
    /// Anything else. The parser accepts it, routing ignores the channel anyway.
    Other(String),
}

impl ChannelType {
    fn from_segment(segment: &str) -> Self {
        match segment {
            "cmd" => ChannelType::Cmd,
            "event" => ChannelType::Event,
            other => ChannelType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Cmd => "cmd",
            ChannelType::Event => "event",
            ChannelType::Other(other) => other,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic split into its routing parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTopic {
    pub version: String,
    pub channel: ChannelType,
    pub device_sn: String,
    /// Remaining segments joined with `/`, e.g. `userpassword/add`.
    pub command: String,
    pub full_topic: String,
}

/// Splits a topic into version, channel, device serial and command.
///
/// Returns `None` when the topic has fewer than four `/`-separated segments.
/// Command names are not validated here.
pub fn parse_topic(topic: &str) -> Option<DecodedTopic> {
    let mut parts = topic.splitn(4, '/');
    let version = parts.next()?;
    let channel = parts.next()?;
    let device_sn = parts.next()?;
    let command = parts.next()?;

    Some(DecodedTopic {
        version: version.to_string(),
        channel: ChannelType::from_segment(channel),
        device_sn: device_sn.to_string(),
        command: command.to_string(),
        full_topic: topic.to_string(),
    })
}

/// Renders a template for one device. Only the first placeholder is replaced; a template
/// without a placeholder comes back unchanged, which is how full-topic overrides pass through.
pub fn build_topic(template: &str, device_sn: &str) -> String {
    template.replacen(DEVICE_PLACEHOLDER, device_sn, 1)
}

/// Segment-wise match where a `+` pattern segment matches any one topic segment.
/// Segment counts must be equal; multi-level wildcards are not supported.
pub fn match_topic(pattern: &str, topic: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    if pattern_parts.len() != topic_parts.len() {
        return false;
    }

    pattern_parts
        .iter()
        .zip(topic_parts.iter())
        .all(|(p, t)| *p == SINGLE_LEVEL_WILDCARD || p == t)
}

/// Outbound command topic, `<schemaVersion>/cmd/<deviceSn>/<command>`.
pub fn command_topic(device_sn: &str, command: &str) -> String {
    format!("{}/cmd/{}/{}", SCHEMA_VERSION, device_sn, command)
}

/// Broadcast topic, `<schemaVersion>/event/broadcast/<command>`.
pub fn broadcast_topic(command: &str) -> String {
    format!("{}/event/{}/{}", SCHEMA_VERSION, BROADCAST_SEGMENT, command)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Personal,
    Records,
    Device,
    Events,
    UserPassword,
    Secret,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Personal => "PERSONAL",
            Category::Records => "RECORDS",
            Category::Device => "DEVICE",
            Category::Events => "EVENTS",
            Category::UserPassword => "USERPASSWORD",
            Category::Secret => "SECRET",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSONAL" => Ok(Category::Personal),
            "RECORDS" => Ok(Category::Records),
            "DEVICE" => Ok(Category::Device),
            "EVENTS" => Ok(Category::Events),
            "USERPASSWORD" => Ok(Category::UserPassword),
            "SECRET" => Ok(Category::Secret),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub category: Category,
    /// Name of the entry inside its category.
    pub key: &'static str,
    /// Command segment(s) as they appear on the wire and in the dispatch table.
    pub command: &'static str,
    pub device_topic: &'static str,
    pub reply_topic: &'static str,
}

impl CommandSpec {
    pub fn topic_for(&self, device_sn: &str) -> String {
        build_topic(self.device_topic, device_sn)
    }

    /// Broker subscription pattern with `+` in the device slot.
    pub fn subscription(&self) -> String {
        build_topic(self.device_topic, SINGLE_LEVEL_WILDCARD)
    }
}

macro_rules! entry {
    ($category:ident, $key:literal, $command:literal, cmd) => {
        CommandSpec {
            category: Category::$category,
            key: $key,
            command: $command,
            device_topic: concat!("20211214/cmd/{#deviceSn}/", $command),
            reply_topic: concat!("20211214/cmd/", $command, "_reply"),
        }
    };
    ($category:ident, $key:literal, $command:literal, event) => {
        CommandSpec {
            category: Category::$category,
            key: $key,
            command: $command,
            device_topic: concat!("20211214/event/{#deviceSn}/", $command),
            reply_topic: concat!("20211214/event/", $command, "_reply"),
        }
    };
}

/// Every command the gateway knows about.
pub static COMMANDS: &[CommandSpec] = &[
    // Personal management
    entry!(Personal, "personCreate", "personCreate", cmd),
    entry!(Personal, "personDelete", "personDelete", cmd),
    entry!(Personal, "personFind", "personFind", cmd),
    entry!(Personal, "whiteListSync", "whiteListSync", cmd),
    entry!(Personal, "whiteListFind", "whiteListFind", cmd),
    entry!(Personal, "registerFeats", "registerFeats", cmd),
    // Identification records
    entry!(Records, "deleteRecords", "deleteRecords", cmd),
    entry!(Records, "findRecords", "findRecords", cmd),
    entry!(Records, "reportRecords", "reportRecords", event),
    // Device management
    entry!(Device, "setConfig", "setConfig", cmd),
    entry!(Device, "getConfig", "getConfig", cmd),
    entry!(Device, "setNetInfo", "setNetInfo", cmd),
    entry!(Device, "setTime", "setTime", cmd),
    entry!(Device, "restartDevice", "restartDevice", cmd),
    entry!(Device, "deviceReset", "deviceReset", cmd),
    entry!(Device, "deviceDisable", "deviceDisable", cmd),
    entry!(Device, "deviceUpgrade", "deviceUpgrade", cmd),
    entry!(Device, "deviceInformation", "deviceInformation", cmd),
    entry!(Device, "cameraCalibrate", "cameraCalibrate", cmd),
    entry!(Device, "control", "control", cmd),
    entry!(Device, "extractLog", "extractLog", cmd),
    entry!(Device, "password", "password", cmd),
    // Events
    entry!(Events, "alarm", "alarm", event),
    entry!(Events, "heartbeat", "heartbeat", event),
    entry!(Events, "lwt", "lwt", event),
    entry!(Events, "connect", "connect", event),
    entry!(Events, "dcs", "dcs", event),
    CommandSpec {
        category: Category::Events,
        key: "onlineCheck",
        command: "onlineCheck_reply",
        device_topic: "20211214/event/{#deviceSn}/onlineCheck_reply",
        reply_topic: "20211214/event/onlineCheck",
    },
    // User passwords
    entry!(UserPassword, "add", "userpassword/add", cmd),
    entry!(UserPassword, "delete", "userpassword/del", cmd),
    entry!(UserPassword, "find", "userpassword/find", cmd),
    // Secret sync (dynamic door codes)
    entry!(Secret, "secretSync", "secretSync", cmd),
];

/// Registry lookup by category and key, e.g. `(UserPassword, "delete")`.
pub fn lookup(category: Category, key: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|entry| entry.category == category && entry.key == key)
}

/// The subscription set, re-established identically after every (re)connect.
pub fn subscription_set() -> Vec<String> {
    COMMANDS.iter().map(CommandSpec::subscription).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_topics_do_not_parse() {
        for topic in ["", "20211214", "20211214/cmd", "20211214/event/connect"] {
            assert_eq!(parse_topic(topic), None, "{topic}");
        }
    }

    #[test]
    fn parse_keeps_multi_segment_commands() {
        let decoded = parse_topic("20211214/cmd/DEV1/userpassword/add").unwrap();
        assert_eq!(decoded.version, "20211214");
        assert_eq!(decoded.channel, ChannelType::Cmd);
        assert_eq!(decoded.device_sn, "DEV1");
        assert_eq!(decoded.command, "userpassword/add");
        assert_eq!(decoded.full_topic, "20211214/cmd/DEV1/userpassword/add");
    }

    #[test]
    fn parse_accepts_unknown_channels_and_commands() {
        let decoded = parse_topic("v2/status/DEV7/whatever").unwrap();
        assert_eq!(decoded.channel, ChannelType::Other("status".into()));
        assert_eq!(decoded.command, "whatever");
    }

    #[test]
    fn parse_allows_empty_segments() {
        let decoded = parse_topic("20211214/event//heartbeat").unwrap();
        assert_eq!(decoded.device_sn, "");
        assert_eq!(decoded.command, "heartbeat");
    }

    #[test]
    fn build_replaces_first_placeholder_only() {
        assert_eq!(
            build_topic("20211214/cmd/{#deviceSn}/personCreate", "DEVICE001"),
            "20211214/cmd/DEVICE001/personCreate"
        );
        assert_eq!(
            build_topic("{#deviceSn}/{#deviceSn}", "A"),
            "A/{#deviceSn}"
        );
    }

    #[test]
    fn build_without_placeholder_is_identity() {
        assert_eq!(
            build_topic("20211214/cmd/DEV9/custom", "DEV1"),
            "20211214/cmd/DEV9/custom"
        );
    }

    #[test]
    fn match_with_wildcard() {
        assert!(match_topic(
            "20211214/cmd/+/personCreate",
            "20211214/cmd/DEV1/personCreate"
        ));
        assert!(!match_topic(
            "20211214/cmd/+/personCreate",
            "20211214/event/DEV1/personCreate"
        ));
        assert!(!match_topic(
            "20211214/cmd/+/userpassword",
            "20211214/cmd/DEV1/userpassword/add"
        ));
        assert!(match_topic("a/b", "a/b"));
    }

    #[test]
    fn registry_covers_every_command_once() {
        let mut commands: Vec<&str> = COMMANDS.iter().map(|c| c.command).collect();
        assert_eq!(commands.len(), 32);
        commands.sort();
        commands.dedup();
        assert_eq!(commands.len(), 32);
    }

    #[test]
    fn subscriptions_match_their_own_rendered_topics() {
        for entry in COMMANDS {
            let topic = entry.topic_for("J257280001");
            assert!(match_topic(&entry.subscription(), &topic), "{topic}");
            let decoded = parse_topic(&topic).unwrap();
            assert_eq!(decoded.device_sn, "J257280001");
            assert_eq!(decoded.command, entry.command);
        }
    }

    #[test]
    fn registry_lookup_by_category_key() {
        let entry = lookup(Category::UserPassword, "delete").unwrap();
        assert_eq!(entry.command, "userpassword/del");
        assert_eq!(entry.reply_topic, "20211214/cmd/userpassword/del_reply");

        let report = lookup(Category::Records, "reportRecords").unwrap();
        assert_eq!(report.device_topic, "20211214/event/{#deviceSn}/reportRecords");

        assert!(lookup(Category::Device, "personCreate").is_none());
        let check = lookup(Category::Events, "onlineCheck").unwrap();
        assert_eq!(check.command, "onlineCheck_reply");
    }

    #[test]
    fn category_round_trips_through_str() {
        for category in [
            Category::Personal,
            Category::Records,
            Category::Device,
            Category::Events,
            Category::UserPassword,
            Category::Secret,
        ] {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("devices".parse::<Category>().is_err());
    }

    #[test]
    fn outbound_topics() {
        assert_eq!(command_topic("DEV1", "setConfig"), "20211214/cmd/DEV1/setConfig");
        assert_eq!(broadcast_topic("onlineCheck"), "20211214/event/broadcast/onlineCheck");
    }
}
