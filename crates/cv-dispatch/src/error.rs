use std::time::Duration;
use thiserror::Error;

use cv_provider::ProviderError;
use crate::handler::HandlerError;
use crate::translator::TranslateError;

/// Invalid route or dispatcher wiring, reported at construction time
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Route has no provider")]
    MissingProvider,

    #[error("Route {0} has no handler")]
    MissingHandler(String),

    #[error("Route {0} was given both an async and a blocking handler")]
    ConflictingHandlers(String),

    #[error("Route name must not be empty")]
    EmptyName,

    #[error("Dispatcher needs at least one route")]
    NoRoutes,

    #[error("Invalid dispatcher configuration: {0}")]
    InvalidDispatcher(String),
}

/// Failure while delivering one message to its handler
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Translation failed: {0}")]
    Translation(#[from] TranslateError),

    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Delivery cancelled")]
    Cancelled,
}

impl From<HandlerError> for DeliveryError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Cancelled => DeliveryError::Cancelled,
            HandlerError::Failed(source) => DeliveryError::Handler(source),
        }
    }
}

/// Failure that ends a dispatch run
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Route {route} failed to start: {source}")]
    RouteStart {
        route: String,
        source: ProviderError,
    },

    #[error("Fetching messages for route {route} failed: {source}")]
    Fetch {
        route: String,
        source: ProviderError,
    },

    #[error("Acknowledging message {message_id} on route {route} failed: {source}")]
    Acknowledge {
        route: String,
        message_id: String,
        source: ProviderError,
    },

    #[error("Dispatch cancelled")]
    Cancelled,

    #[error("Dispatch aborted before the queue drained")]
    Aborted,

    #[error("Dispatcher task panicked: {0}")]
    TaskPanicked(String),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Dispatcher did not drain within {0:?} after shutdown was requested")]
    ShutdownTimeout(Duration),
}
