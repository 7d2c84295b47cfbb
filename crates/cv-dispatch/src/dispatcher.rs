//! Dispatcher: fetch loops and a worker pool around one bounded queue
//!
//! Each route gets a fetch loop that pulls batches from its provider and puts
//! them on the shared [`WorkQueue`]; a full queue suspends the fetch loop, so
//! fetching is throttled by consumption. A fixed pool of workers takes entries
//! off the queue, delivers them through their route and acknowledges or
//! releases them based on the outcome.
//!
//! Shutdown is two-phase. Once every fetch loop has finished (one cycle in
//! single-shot mode, or cancellation of the token in forever mode) the
//! dispatcher waits for the queue to drain and only then stops the workers, so
//! no fetched message is abandoned between fetch and acknowledgment.
//!
//! Any fetch error, acknowledgment error, handler cancellation or task panic is
//! fatal to the run: remaining tasks are aborted and the error is returned.
//! [`Dispatcher::abort`] ends a run the same way without waiting for the
//! drain. Routes are exited in every case.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cv_common::{Outcome, RawMessage};

use crate::dispatch_metrics;
use crate::error::{DeliveryError, DispatchError, RouteError};
use crate::queue::{QueueEntry, WorkQueue};
use crate::route::Route;

/// Sizing of a dispatch run. Unset values are derived from the route count.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue capacity (default: routes x 10)
    pub queue_size: Option<usize>,
    /// Worker count (default: max(routes, 3))
    pub workers: Option<usize>,
    /// Pause after an empty fetch in forever mode
    pub empty_fetch_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: None,
            workers: None,
            empty_fetch_delay: Duration::from_millis(100),
        }
    }
}

pub struct Dispatcher {
    routes: Vec<Arc<Route>>,
    queue_size: usize,
    workers: usize,
    empty_fetch_delay: Duration,
    cancel: CancellationToken,
    abort: CancellationToken,
}

impl Dispatcher {
    pub fn new(routes: Vec<Route>, config: DispatcherConfig) -> Result<Self, RouteError> {
        if routes.is_empty() {
            return Err(RouteError::NoRoutes);
        }

        let queue_size = config.queue_size.unwrap_or(routes.len() * 10);
        if queue_size == 0 {
            return Err(RouteError::InvalidDispatcher("queue_size must be positive".to_string()));
        }

        let workers = config.workers.unwrap_or_else(|| routes.len().max(3));
        if workers == 0 {
            return Err(RouteError::InvalidDispatcher("workers must be positive".to_string()));
        }

        Ok(Self {
            routes: routes.into_iter().map(Arc::new).collect(),
            queue_size,
            workers,
            empty_fetch_delay: config.empty_fetch_delay,
            cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop fetching; in-flight and queued messages are still processed.
    ///
    /// The token is never reset, so a stopped dispatcher's next forever-mode
    /// run finishes immediately.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping dispatcher");
        }
        self.cancel.cancel();
    }

    /// Abandon the current run without draining.
    ///
    /// Fetch loops and workers are aborted, routes are still exited and the
    /// run returns [`DispatchError::Aborted`]. Messages that were not
    /// acknowledged are left to the provider's redelivery.
    pub fn abort(&self) {
        if !self.abort.is_cancelled() {
            warn!("Aborting dispatcher");
        }
        self.cancel.cancel();
        self.abort.cancel();
    }

    /// Run the dispatcher.
    ///
    /// With `forever == false` every route performs exactly one fetch cycle and
    /// the call returns once those messages are handled. With `forever == true`
    /// fetching continues until the cancellation token fires.
    pub async fn dispatch(&self, forever: bool) -> crate::Result<()> {
        let queue = Arc::new(WorkQueue::new(self.queue_size));

        let mut entered: Vec<&Arc<Route>> = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            if let Err(source) = route.enter().await {
                error!(route = %route, error = %source, "Failed to start route");
                for started in entered.iter().rev() {
                    started.exit().await;
                }
                return Err(DispatchError::RouteStart {
                    route: route.name().to_string(),
                    source,
                });
            }
            entered.push(route);
        }

        info!(
            routes = self.routes.len(),
            queue_size = self.queue_size,
            workers = self.workers,
            forever,
            "Dispatcher started"
        );

        let result = self.run(&queue, forever).await;

        for route in entered.iter().rev() {
            route.exit().await;
        }

        match &result {
            Ok(()) => info!("Dispatcher finished"),
            Err(e) => debug!(error = %e, "Dispatcher run ended with error"),
        }
        result
    }

    async fn run(&self, queue: &Arc<WorkQueue>, forever: bool) -> crate::Result<()> {
        let mut fetchers = JoinSet::new();
        for route in &self.routes {
            fetchers.spawn(fetch_loop(
                Arc::clone(route),
                Arc::clone(queue),
                self.cancel.clone(),
                forever,
                self.empty_fetch_delay,
            ));
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            workers.spawn(worker_loop(worker_id, Arc::clone(queue)));
        }

        let result = tokio::select! {
            result = supervise(&mut fetchers, &mut workers, queue) => result,
            _ = self.abort.cancelled() => {
                warn!(unfinished = queue.unfinished(), "Dispatcher aborted before draining");
                Err(DispatchError::Aborted)
            }
        };

        // Workers are idle once the queue has drained; on failure this also
        // aborts whatever is still in flight.
        fetchers.shutdown().await;
        workers.shutdown().await;

        result
    }
}

/// Wait for the fetch loops, then for the queue to drain, failing fast on the
/// first task error.
async fn supervise(
    fetchers: &mut JoinSet<crate::Result<()>>,
    workers: &mut JoinSet<crate::Result<()>>,
    queue: &WorkQueue,
) -> crate::Result<()> {
    while !fetchers.is_empty() {
        tokio::select! {
            Some(joined) = fetchers.join_next() => task_result(joined)?,
            Some(joined) = workers.join_next() => task_result(joined)?,
            else => break,
        }
    }

    debug!(unfinished = queue.unfinished(), "Fetch loops finished, draining queue");

    loop {
        tokio::select! {
            _ = queue.join() => break,
            Some(joined) = workers.join_next() => task_result(joined)?,
        }
    }

    Ok(())
}

fn task_result(joined: Result<crate::Result<()>, JoinError>) -> crate::Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(DispatchError::TaskPanicked(e.to_string())),
    }
}

async fn fetch_loop(
    route: Arc<Route>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
    forever: bool,
    empty_fetch_delay: Duration,
) -> crate::Result<()> {
    loop {
        // The token is only checked between cycles: a fetch in flight always
        // completes so its messages reach the queue.
        if forever && cancel.is_cancelled() {
            break;
        }

        let messages = route.provider().fetch_messages().await.map_err(|source| {
            dispatch_metrics::record_fetch_error(route.name());
            error!(route = %route, error = %source, "Error fetching messages");
            DispatchError::Fetch {
                route: route.name().to_string(),
                source,
            }
        })?;

        let fetched_any = !messages.is_empty();
        if fetched_any {
            debug!(route = %route, count = messages.len(), "Fetched messages");
            dispatch_metrics::record_messages_fetched(route.name(), messages.len());
        }

        // Fetch order is preserved within a route. A full queue suspends here.
        for message in messages {
            let entry = QueueEntry {
                message,
                route: Arc::clone(&route),
            };
            if queue.put(entry).await.is_err() {
                warn!(route = %route, "Work queue closed, stopping fetch loop");
                return Ok(());
            }
        }
        if fetched_any {
            dispatch_metrics::set_queue_unfinished(queue.unfinished());
        }

        if !forever {
            break;
        }

        if !fetched_any {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(empty_fetch_delay) => {}
            }
        }
    }

    debug!(route = %route, "Fetch loop finished");
    Ok(())
}

async fn worker_loop(worker_id: usize, queue: Arc<WorkQueue>) -> crate::Result<()> {
    while let Some((entry, done)) = queue.get().await {
        if let Err(e) = process_entry(worker_id, entry).await {
            // Unresolved: keep it unfinished so the drain cannot complete
            done.abandon();
            return Err(e);
        }
        drop(done);
    }
    Ok(())
}

async fn process_entry(worker_id: usize, entry: QueueEntry) -> crate::Result<()> {
    let QueueEntry { message, route } = entry;
    let start = Instant::now();

    let outcome = if message.is_empty() {
        warn!(route = %route, message_id = %message.id, worker_id, "Empty message, not processing");
        Outcome::NotProcessed
    } else {
        match route.deliver(&message).await {
            Ok(outcome) => outcome,
            Err(DeliveryError::Cancelled) => {
                warn!(
                    route = %route,
                    message_id = %message.id,
                    worker_id,
                    "Delivery cancelled, leaving message unacknowledged"
                );
                return Err(DispatchError::Cancelled);
            }
            Err(error) => {
                error!(
                    route = %route,
                    message_id = %message.id,
                    worker_id,
                    error = %error,
                    "Error delivering message"
                );
                dispatch_metrics::record_delivery_error(route.name());
                Outcome::from(route.error_handler(&error, &message).await)
            }
        }
    };

    if outcome == Outcome::Delete {
        info!(route = %route, message_id = %message.id, "Handler requested message deletion");
    }

    acknowledge(&route, &message, outcome).await?;

    debug!(route = %route, message_id = %message.id, worker_id, outcome = %outcome, "Message processed");
    dispatch_metrics::record_message_processed(route.name(), outcome, start.elapsed());
    Ok(())
}

async fn acknowledge(route: &Route, message: &RawMessage, outcome: Outcome) -> crate::Result<()> {
    let provider = route.provider();
    let result = if outcome.acknowledges() {
        provider.confirm_message(message).await
    } else {
        provider.message_not_processed(message).await
    };

    result.map_err(|source| {
        error!(
            route = %route,
            message_id = %message.id,
            outcome = %outcome,
            error = %source,
            "Failed to acknowledge message"
        );
        DispatchError::Acknowledge {
            route: route.name().to_string(),
            message_id: message.id.clone(),
            source,
        }
    })
}
