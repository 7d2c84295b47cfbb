//! Conveyor Dispatch Engine
//!
//! This crate connects message providers to user handlers:
//! - Route: one provider bound to one handler, with optional translator and error handler
//! - Dispatcher: per-route fetch loops feeding a bounded queue drained by a fixed worker pool
//! - WorkQueue: bounded queue with unfinished-entry accounting for graceful drain
//! - Manager: process-level runner wiring OS signals into the dispatcher's cancellation
//! - Translators: JSON and SNS envelope translation of raw message bodies
//! - Metrics: fetch, delivery and acknowledgment counters via the `metrics` facade

pub mod error;
pub mod handler;
pub mod translator;
pub mod route;
pub mod queue;
pub mod dispatcher;
pub mod manager;
pub mod dispatch_metrics;

pub use error::{DeliveryError, DispatchError, ManagerError, RouteError};
pub use handler::{
    BlockingHandler, ErrorHandler, FnErrorHandler, FnHandler, Handler, HandlerError,
    error_handler_fn, handler_fn,
};
pub use translator::{JsonTranslator, SnsTranslator, TranslateError, Translator};
pub use route::{Route, RouteBuilder};
pub use queue::{QueueEntry, TaskDone, WorkQueue};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use manager::{Manager, shutdown_signal};

// Re-export the shared model so handlers only need this crate
pub use cv_common::{Metadata, Outcome, RawMessage, TranslatedMessage};
pub use cv_provider::{Provider, ProviderError};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, DispatchError>;
