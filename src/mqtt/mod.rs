//! # MQTT Integration Module
//!
//! Everything that touches the broker: the topic scheme, the connection, inbound decoding and
//! the outbound command publisher.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and connection policy defaults
//! ├── error.rs            - Transport and publisher errors
//! ├── message_manager.rs  - Inbound queue, payload decoding, wire envelopes
//! ├── mqtt_handler.rs     - Connection driver, reconnect loop, publish acknowledgments
//! ├── publisher.rs        - Command envelopes and per-command convenience methods
//! └── topics.rs           - Topic codec and the static command registry
//! ```
//!
//! ## Data Flow
//!
//! **Inbound:** the connection driver pushes each broker publish onto the queue owned by
//! [`message_manager::MsgManager`]; its dispatcher task decodes the payload and hands topic and
//! payload to the [`CommandRouter`](crate::dispatch::CommandRouter), one message at a time.
//!
//! **Outbound:** callers go through [`publisher::Publisher`], which builds the envelope and
//! publishes through any [`mqtt_handler::Transport`], normally an
//! [`mqtt_handler::MqttHandle`].
//!
//! ## Connection Policy
//!
//! - Each attempt is bounded by `connect_timeout` (10 s), retries wait `reconnect_interval`
//!   (1 s), and `connect()` gives up after `connect_guard` (15 s).
//! - The subscription set is re-established on every connection acknowledgment.
//! - Publishing while not connected fails at once with `NotConnected`. Nothing is queued.

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
pub mod topics;
