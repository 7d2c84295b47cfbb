//! Handler capabilities
//!
//! A route's handler is resolved once when the route is built: async handlers
//! run on the worker task, blocking handlers are wrapped in [`BlockingHandler`]
//! and run on tokio's blocking pool so they cannot stall other deliveries.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use cv_common::{Metadata, Outcome, RawMessage};
use crate::error::DeliveryError;

/// Error returned by a handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler gave up because the run is being cancelled. The message is
    /// neither confirmed nor released and the dispatch run stops.
    #[error("handler cancelled")]
    Cancelled,

    /// Any other failure; routed to the route's error handler
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Business logic consuming translated messages
///
/// A panic while handling a message is caught by the route and reported as
/// [`HandlerError::Failed`], for async and blocking handlers alike, so it goes
/// through the route's error handler like any other failure.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, content: Value, metadata: Metadata) -> Result<Outcome, HandlerError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, content: Value, metadata: Metadata) -> Result<Outcome, HandlerError> {
        (**self).handle(content, metadata).await
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Build a handler from an async closure returning `bool` or [`Outcome`].
///
/// ```rust,ignore
/// let handler = handler_fn(|content, _metadata| async move {
///     tracing::info!(%content, "received");
///     Ok::<_, HandlerError>(true)
/// });
/// ```
pub fn handler_fn<F, Fut, O>(f: F) -> FnHandler<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    O: Into<Outcome> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut, O> Handler for FnHandler<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    O: Into<Outcome> + Send + 'static,
{
    async fn handle(&self, content: Value, metadata: Metadata) -> Result<Outcome, HandlerError> {
        (self.f)(content, metadata).await.map(Into::into)
    }
}

/// Synchronous handler offloaded to `spawn_blocking`
pub struct BlockingHandler<F> {
    f: Arc<F>,
}

impl<F, O> BlockingHandler<F>
where
    F: Fn(Value, Metadata) -> Result<O, HandlerError> + Send + Sync + 'static,
    O: Into<Outcome> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F, O> Handler for BlockingHandler<F>
where
    F: Fn(Value, Metadata) -> Result<O, HandlerError> + Send + Sync + 'static,
    O: Into<Outcome> + Send + 'static,
{
    async fn handle(&self, content: Value, metadata: Metadata) -> Result<Outcome, HandlerError> {
        let f = Arc::clone(&self.f);

        let joined = tokio::task::spawn_blocking(move || f(content, metadata)).await;

        match joined {
            Ok(result) => result.map(Into::into),
            Err(e) if e.is_cancelled() => Err(HandlerError::Cancelled),
            Err(e) => match e.try_into_panic() {
                Ok(payload) => Err(panicked(&*payload)),
                Err(e) => Err(HandlerError::Failed(anyhow::anyhow!("blocking handler failed: {e}"))),
            },
        }
    }
}

/// Failure reported for a handler that panicked
pub(crate) fn panicked(payload: &(dyn Any + Send)) -> HandlerError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    HandlerError::Failed(anyhow::anyhow!("handler panicked: {message}"))
}

/// Decides the fate of a message whose delivery failed.
///
/// Returning `true` acknowledges the message, `false` releases it.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, error: &DeliveryError, message: &RawMessage) -> bool;
}

#[async_trait]
impl<E: ErrorHandler + ?Sized> ErrorHandler for Arc<E> {
    async fn handle_error(&self, error: &DeliveryError, message: &RawMessage) -> bool {
        (**self).handle_error(error, message).await
    }
}

/// Error handler backed by a plain closure, see [`error_handler_fn`]
pub struct FnErrorHandler<F> {
    f: F,
}

/// Build an error handler from a synchronous decision function.
///
/// The closure runs inline on the worker; implement [`ErrorHandler`] directly
/// for anything that needs I/O.
pub fn error_handler_fn<F>(f: F) -> FnErrorHandler<F>
where
    F: Fn(&DeliveryError, &RawMessage) -> bool + Send + Sync,
{
    FnErrorHandler { f }
}

#[async_trait]
impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(&DeliveryError, &RawMessage) -> bool + Send + Sync,
{
    async fn handle_error(&self, error: &DeliveryError, message: &RawMessage) -> bool {
        (self.f)(error, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn_accepts_bool_and_outcome() {
        let by_bool = handler_fn(|content, _| async move { Ok::<_, HandlerError>(content == json!("yes")) });
        assert_eq!(by_bool.handle(json!("yes"), Metadata::new()).await.unwrap(), Outcome::Confirm);
        assert_eq!(by_bool.handle(json!("no"), Metadata::new()).await.unwrap(), Outcome::NotProcessed);

        let by_outcome = handler_fn(|_, _| async { Ok::<_, HandlerError>(Outcome::Delete) });
        assert_eq!(by_outcome.handle(json!(1), Metadata::new()).await.unwrap(), Outcome::Delete);
    }

    #[tokio::test]
    async fn test_blocking_handler_runs_off_the_async_worker() {
        let caller = std::thread::current().id();
        let handler = BlockingHandler::new(move |content: Value, _: Metadata| {
            Ok::<_, HandlerError>(content.is_string() && std::thread::current().id() != caller)
        });

        assert_eq!(handler.handle(json!("x"), Metadata::new()).await.unwrap(), Outcome::Confirm);
    }

    #[tokio::test]
    async fn test_blocking_handler_panic_becomes_failure() {
        let handler = BlockingHandler::new(|_: Value, _: Metadata| -> Result<bool, HandlerError> {
            panic!("boom")
        });

        let err = handler.handle(json!("x"), Metadata::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(e) if e.to_string() == "handler panicked: boom"));
    }

    #[tokio::test]
    async fn test_error_handler_fn() {
        let handler = error_handler_fn(|error, message| {
            matches!(error, DeliveryError::Handler(_)) && message.id == "m-1"
        });
        let message = RawMessage::new("m-1", "body");

        assert!(handler.handle_error(&DeliveryError::Handler(anyhow::anyhow!("x")), &message).await);
        assert!(!handler.handle_error(&DeliveryError::Cancelled, &message).await);
    }
}
