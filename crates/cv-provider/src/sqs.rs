use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::operation::change_message_visibility::ChangeMessageVisibilityError;
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::types::{Message as SqsMessage, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::{Provider, ProviderError, Result};
use cv_common::RawMessage;

/// SQS caps visibility timeouts at 12 hours.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

/// What to do when SQS reports that a message being acknowledged no longer
/// exists (expired receipt handle, message already deleted, not in flight).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingMessagePolicy {
    /// Log at debug level and treat the acknowledgment as done
    #[default]
    Ignore,
    /// Return [`ProviderError::NotFound`] to the dispatcher
    Propagate,
}

/// Settings for one SQS-backed provider
#[derive(Debug, Clone)]
pub struct SqsProviderConfig {
    /// Provider identifier; defaults to the last segment of the queue URL
    pub name: Option<String>,
    pub queue_url: String,
    /// Messages per receive call (SQS allows 1..=10)
    pub max_messages: u32,
    /// Long poll wait (SQS allows 0..=20)
    pub wait_time_seconds: u32,
    /// Visibility timeout applied on receive; queue default when None
    pub visibility_timeout: Option<u32>,
    /// Seconds of redelivery delay per observed receive; 0 disables backoff
    pub backoff_multiplier: u32,
    /// Upper bound for the redelivery delay in seconds
    pub backoff_limit: u32,
    pub missing_message_policy: MissingMessagePolicy,
}

impl SqsProviderConfig {
    /// Default long poll wait time in seconds.
    /// 5 seconds balances efficiency with shutdown responsiveness.
    pub const DEFAULT_WAIT_TIME_SECONDS: u32 = 5;

    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            name: None,
            queue_url: queue_url.into(),
            max_messages: 10,
            wait_time_seconds: Self::DEFAULT_WAIT_TIME_SECONDS,
            visibility_timeout: None,
            backoff_multiplier: 0,
            backoff_limit: 900,
            missing_message_policy: MissingMessagePolicy::default(),
        }
    }
}

/// Counters kept by [`SqsProvider`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsProviderStats {
    pub total_fetched: u64,
    pub total_confirmed: u64,
    pub total_released: u64,
}

/// Provider reading from an AWS SQS queue.
///
/// The client is injected so several providers can share one connection pool
/// and tests can point it at LocalStack.
pub struct SqsProvider {
    client: Client,
    config: SqsProviderConfig,
    name: String,
    running: AtomicBool,
    total_fetched: AtomicU64,
    total_confirmed: AtomicU64,
    total_released: AtomicU64,
}

impl SqsProvider {
    pub fn new(client: Client, config: SqsProviderConfig) -> Self {
        let name = config
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| queue_name_from_url(&config.queue_url));

        Self {
            client,
            config,
            name,
            running: AtomicBool::new(true),
            total_fetched: AtomicU64::new(0),
            total_confirmed: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SqsProviderConfig {
        &self.config
    }

    pub fn stats(&self) -> SqsProviderStats {
        SqsProviderStats {
            total_fetched: self.total_fetched.load(Ordering::Relaxed),
            total_confirmed: self.total_confirmed.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
        }
    }

    fn receipt_handle<'a>(&self, message: &'a RawMessage) -> Result<&'a str> {
        message
            .receipt_handle
            .as_deref()
            .ok_or_else(|| ProviderError::MissingReceiptHandle(message.id.clone()))
    }

    fn missing_message(&self, message: &RawMessage, action: &str) -> Result<()> {
        match self.config.missing_message_policy {
            MissingMessagePolicy::Ignore => {
                debug!(
                    queue = %self.name,
                    message_id = %message.id,
                    action = action,
                    "Message no longer in flight, ignoring"
                );
                Ok(())
            }
            MissingMessagePolicy::Propagate => Err(ProviderError::NotFound(message.id.clone())),
        }
    }
}

#[async_trait]
impl Provider for SqsProvider {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn fetch_messages(&self) -> Result<Vec<RawMessage>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ProviderError::Stopped);
        }

        let mut request = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_messages.clamp(1, 10) as i32)
            .wait_time_seconds(self.config.wait_time_seconds.min(20) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All");

        if let Some(timeout) = self.config.visibility_timeout {
            request = request.visibility_timeout(timeout.min(MAX_VISIBILITY_TIMEOUT_SECONDS) as i32);
        }

        let result = request
            .send()
            .await
            .map_err(|e| ProviderError::Sqs(DisplayErrorContext(&e).to_string()))?;

        let messages: Vec<RawMessage> = result
            .messages
            .unwrap_or_default()
            .iter()
            .map(to_raw_message)
            .collect();

        if !messages.is_empty() {
            self.total_fetched.fetch_add(messages.len() as u64, Ordering::Relaxed);
            debug!(queue = %self.name, count = messages.len(), "Fetched messages from SQS");
        }

        Ok(messages)
    }

    async fn confirm_message(&self, message: &RawMessage) -> Result<()> {
        let receipt_handle = self.receipt_handle(message)?;

        let result = self
            .client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await;

        if let Err(e) = result {
            let missing = matches!(
                e.as_service_error(),
                Some(DeleteMessageError::ReceiptHandleIsInvalid(_))
            );
            if missing {
                return self.missing_message(message, "delete");
            }
            return Err(ProviderError::Sqs(DisplayErrorContext(&e).to_string()));
        }

        self.total_confirmed.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.name, message_id = %message.id, "Message deleted from SQS");
        Ok(())
    }

    async fn message_not_processed(&self, message: &RawMessage) -> Result<()> {
        if self.config.backoff_multiplier == 0 {
            debug!(
                queue = %self.name,
                message_id = %message.id,
                "Message not processed, leaving it to the queue's visibility timeout"
            );
            return Ok(());
        }

        let receipt_handle = self.receipt_handle(message)?;
        let timeout = backoff_visibility(
            message.receive_count,
            self.config.backoff_multiplier,
            self.config.backoff_limit,
        );

        let result = self
            .client
            .change_message_visibility()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout as i32)
            .send()
            .await;

        if let Err(e) = result {
            let missing = matches!(
                e.as_service_error(),
                Some(ChangeMessageVisibilityError::ReceiptHandleIsInvalid(_))
                    | Some(ChangeMessageVisibilityError::MessageNotInflight(_))
            );
            if missing {
                return self.missing_message(message, "change_visibility");
            }
            return Err(ProviderError::Sqs(DisplayErrorContext(&e).to_string()));
        }

        self.total_released.fetch_add(1, Ordering::Relaxed);
        debug!(
            queue = %self.name,
            message_id = %message.id,
            receive_count = message.receive_count,
            visibility_timeout = timeout,
            "Message released with backoff"
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.client
            .get_queue_attributes()
            .queue_url(&self.config.queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(DisplayErrorContext(&e).to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        info!(queue = %self.name, queue_url = %self.config.queue_url, "SQS provider started");
        Ok(())
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(queue = %self.name, "SQS provider already stopped");
            return;
        }
        let stats = self.stats();
        info!(
            queue = %self.name,
            fetched = stats.total_fetched,
            confirmed = stats.total_confirmed,
            released = stats.total_released,
            "SQS provider stopped"
        );
    }
}

/// Redelivery delay for a message seen `receive_count` times.
pub fn backoff_visibility(receive_count: u32, multiplier: u32, limit: u32) -> u32 {
    receive_count
        .max(1)
        .saturating_mul(multiplier)
        .min(limit)
        .min(MAX_VISIBILITY_TIMEOUT_SECONDS)
}

fn queue_name_from_url(queue_url: &str) -> String {
    queue_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("sqs")
        .to_string()
}

fn to_raw_message(sqs_msg: &SqsMessage) -> RawMessage {
    let mut attributes = HashMap::new();

    if let Some(message_attributes) = sqs_msg.message_attributes() {
        for (key, value) in message_attributes {
            if let Some(text) = value.string_value() {
                attributes.insert(key.clone(), text.to_string());
            }
        }
    }

    let mut receive_count = 1;
    if let Some(system_attributes) = sqs_msg.attributes() {
        for (key, value) in system_attributes {
            if *key == MessageSystemAttributeName::ApproximateReceiveCount {
                receive_count = value.parse().unwrap_or(1);
            }
            attributes
                .entry(key.as_str().to_string())
                .or_insert_with(|| value.clone());
        }
    }

    RawMessage {
        id: sqs_msg.message_id().unwrap_or_default().to_string(),
        body: sqs_msg.body().unwrap_or_default().to_string(),
        receipt_handle: sqs_msg.receipt_handle().map(|s| s.to_string()),
        attributes,
        receive_count,
    }
}
