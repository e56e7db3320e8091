//! Errors a handler can hand back to the router.

use thiserror::Error;

use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The business-logic collaborator refused or failed the operation.
    #[error("{operation} failed: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },
}

impl HandlerError {
    pub fn service(operation: &'static str, source: ServiceError) -> Self {
        HandlerError::Service { operation, source }
    }
}
