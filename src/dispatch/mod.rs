//! # Inbound dispatch
//!
//! [`router::CommandRouter`] turns a topic into `(device_sn, command)` and runs the handler
//! registered for that command in the [`router::DispatchTable`]. The table the binary uses is
//! built by [`handlers::build_dispatch_table`] from a [`Services`](crate::services::Services)
//! bundle; tests build their own with spy handlers.

pub mod error;
pub mod handlers;
pub mod router;

pub use error::HandlerError;
pub use handlers::build_dispatch_table;
pub use router::{CommandRouter, DispatchTable, RouteOutcome};
