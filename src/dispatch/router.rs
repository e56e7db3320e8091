//! Command router and its dispatch table.
//!
//! The table maps a command name to one async handler taking `(device_sn, payload)`. It is
//! assembled once at startup through [`DispatchTableBuilder`] and shared read-only afterwards.
//! Routing is by command name only; `cmd` and `event` topics with the same command reach the
//! same handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::error::HandlerError;
use crate::mqtt::topics::parse_topic;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct DispatchTableBuilder {
    routes: HashMap<String, HandlerFn>,
}

impl DispatchTableBuilder {
    /// Registers `handler` for `command`. A second registration for the same command replaces
    /// the first.
    pub fn route<F, Fut>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let command = command.into();
        let handler: HandlerFn = Arc::new(move |device_sn, payload| {
            Box::pin(handler(device_sn, payload)) as HandlerFuture
        });
        if self.routes.insert(command.clone(), handler).is_some() {
            warn!(command = %command, "Handler registered twice, keeping the last one");
        }
        self
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            routes: Arc::new(self.routes),
        }
    }
}

/// Immutable command name → handler map.
#[derive(Clone)]
pub struct DispatchTable {
    routes: Arc<HashMap<String, HandlerFn>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    pub fn get(&self, command: &str) -> Option<&HandlerFn> {
        self.routes.get(command)
    }

    pub fn contains(&self, command: &str) -> bool {
        self.routes.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("commands", &self.commands())
            .finish()
    }
}

/// What happened to one inbound message. Informational only; the router never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    InvalidTopic,
    UnknownCommand { device_sn: String, command: String },
    Handled { device_sn: String, command: String },
    HandlerFailed { device_sn: String, command: String },
    HandlerPanicked { device_sn: String, command: String },
}

#[derive(Debug, Clone)]
pub struct CommandRouter {
    table: DispatchTable,
}

impl CommandRouter {
    pub fn new(table: DispatchTable) -> Self {
        CommandRouter { table }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Parses `topic` and runs the matching handler to completion.
    ///
    /// Invalid topics and unmapped commands are logged and dropped. The handler runs on its own
    /// task so an error or a panic inside it is contained here and logged with the command and
    /// device serial.
    pub async fn route(&self, topic: &str, payload: Value) -> RouteOutcome {
        let Some(decoded) = parse_topic(topic) else {
            warn!(topic = %topic, "Invalid topic format");
            return RouteOutcome::InvalidTopic;
        };

        let device_sn = decoded.device_sn;
        let command = decoded.command;

        let Some(handler) = self.table.get(&command) else {
            warn!(command = %command, device_sn = %device_sn, "Unknown command");
            return RouteOutcome::UnknownCommand { device_sn, command };
        };

        debug!(
            command = %command,
            device_sn = %device_sn,
            channel = %decoded.channel,
            "Routing message"
        );

        let task = tokio::spawn(handler(device_sn.clone(), payload));
        match task.await {
            Ok(Ok(())) => RouteOutcome::Handled { device_sn, command },
            Ok(Err(e)) => {
                error!(
                    command = %command,
                    device_sn = %device_sn,
                    error = %e,
                    "Route message error"
                );
                RouteOutcome::HandlerFailed { device_sn, command }
            }
            Err(e) => {
                error!(
                    command = %command,
                    device_sn = %device_sn,
                    error = %e,
                    "Handler task aborted"
                );
                RouteOutcome::HandlerPanicked { device_sn, command }
            }
        }
    }
}
