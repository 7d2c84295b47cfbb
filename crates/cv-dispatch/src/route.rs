//! Route: one provider wired to one handler
//!
//! A route owns the per-message delivery protocol (translate, then hand the
//! content to the handler) and the provider's lifecycle scope for the duration
//! of a dispatch run.

use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info};

use cv_common::{Metadata, Outcome, RawMessage, TranslatedMessage};
use cv_provider::{Provider, ProviderError};

use crate::error::{DeliveryError, RouteError};
use crate::handler::{panicked, BlockingHandler, ErrorHandler, Handler, HandlerError};
use crate::translator::{TranslateError, Translator};

pub struct Route {
    name: String,
    provider: Arc<dyn Provider>,
    handler: Arc<dyn Handler>,
    translator: Option<Arc<dyn Translator>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Route {
    pub fn builder() -> RouteBuilder {
        RouteBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Translate a raw message into handler content.
    ///
    /// Without a translator the body is passed through unchanged with empty
    /// metadata. A translator that yields empty content is a wiring mistake and
    /// fails with [`TranslateError::EmptyContent`].
    pub fn prepare_message(&self, message: &RawMessage) -> Result<TranslatedMessage, TranslateError> {
        let Some(translator) = &self.translator else {
            return Ok(TranslatedMessage::from_raw(message));
        };

        let translated = translator.translate(message)?;
        if !translated.has_content() {
            return Err(TranslateError::EmptyContent {
                translator: translator.name().to_string(),
                message_id: message.id.clone(),
            });
        }

        Ok(translated)
    }

    /// Translate the message and run the handler, returning its outcome verbatim.
    ///
    /// A panicking handler is reported as [`DeliveryError::Handler`].
    pub async fn deliver(&self, message: &RawMessage) -> Result<Outcome, DeliveryError> {
        let TranslatedMessage { content, metadata } = self.prepare_message(message)?;

        debug!(route = %self.name, message_id = %message.id, "Delivering message");
        let handled = AssertUnwindSafe(self.handler.handle(content, metadata))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panicked(&*payload)));

        Ok(handled?)
    }

    /// Ask the route's error handler what to do with a failed message.
    ///
    /// `true` acknowledges the message. Without an error handler the message is
    /// left unacknowledged.
    pub async fn error_handler(&self, error: &DeliveryError, message: &RawMessage) -> bool {
        match &self.error_handler {
            Some(handler) => handler.handle_error(error, message).await,
            None => false,
        }
    }

    /// Acquire the provider's resources for a dispatch run.
    pub async fn enter(&self) -> Result<(), ProviderError> {
        info!(route = %self.name, "Starting route");
        self.provider.start().await
    }

    /// Release the provider's resources.
    pub async fn exit(&self) {
        self.provider.stop().await;
        info!(route = %self.name, "Stopping route");
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("provider", &self.provider.identifier())
            .field("translator", &self.translator.as_ref().map(|t| t.name()))
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// Builder validating a route's wiring before any message is fetched
#[derive(Default)]
pub struct RouteBuilder {
    name: Option<String>,
    provider: Option<Arc<dyn Provider>>,
    handler: Option<Arc<dyn Handler>>,
    blocking_handler: Option<Arc<dyn Handler>>,
    translator: Option<Arc<dyn Translator>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl RouteBuilder {
    /// Route name; defaults to the provider's identifier
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Async handler, run on the worker task
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Synchronous handler, run on tokio's blocking pool
    pub fn blocking_handler<F, O>(mut self, f: F) -> Self
    where
        F: Fn(Value, Metadata) -> Result<O, HandlerError> + Send + Sync + 'static,
        O: Into<Outcome> + Send + 'static,
    {
        self.blocking_handler = Some(Arc::new(BlockingHandler::new(f)));
        self
    }

    pub fn translator<T: Translator + 'static>(mut self, translator: T) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn error_handler<E: ErrorHandler + 'static>(mut self, error_handler: E) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn build(self) -> Result<Route, RouteError> {
        let provider = self.provider.ok_or(RouteError::MissingProvider)?;

        let name = match self.name {
            Some(name) => name,
            None => provider.identifier().to_string(),
        };
        if name.trim().is_empty() {
            return Err(RouteError::EmptyName);
        }

        let handler = match (self.handler, self.blocking_handler) {
            (Some(handler), None) | (None, Some(handler)) => handler,
            (Some(_), Some(_)) => return Err(RouteError::ConflictingHandlers(name)),
            (None, None) => return Err(RouteError::MissingHandler(name)),
        };

        Ok(Route {
            name,
            provider,
            handler,
            translator: self.translator,
            error_handler: self.error_handler,
        })
    }
}
