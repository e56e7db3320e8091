//! Face-recognition terminal gateway.
//!
//! Bridges door terminals speaking the `20211214/...` MQTT topic scheme to the business-logic
//! services: inbound device traffic is routed by command name to a handler, outbound commands
//! are wrapped in envelopes and published per device.

pub mod config;
pub mod dispatch;
pub mod mqtt;
pub mod services;
