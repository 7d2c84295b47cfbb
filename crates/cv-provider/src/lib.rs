//! Message providers
//!
//! A provider is the source side of a route: it fetches raw messages from a
//! broker and acknowledges or releases them once the dispatcher has decided
//! their fate. Each provider owns its own connection lifecycle through
//! [`Provider::start`] and [`Provider::stop`].

use async_trait::async_trait;
use cv_common::RawMessage;

pub mod error;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use error::ProviderError;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Capability consumed by the dispatcher for one message source
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used as the default route name
    fn identifier(&self) -> &str;

    /// Fetch the next batch of messages.
    ///
    /// Returns an empty vector when nothing is available. Implementations must
    /// not block indefinitely (long polls should have a bounded wait).
    async fn fetch_messages(&self) -> Result<Vec<RawMessage>>;

    /// Acknowledge a processed message so it is not delivered again.
    async fn confirm_message(&self, message: &RawMessage) -> Result<()>;

    /// Called when a message was not processed. Providers may release the
    /// message for redelivery here, optionally with a backoff.
    async fn message_not_processed(&self, _message: &RawMessage) -> Result<()> {
        Ok(())
    }

    /// Acquire the provider's resources (connections, queue lookups).
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release the provider's resources. Must be safe to call after a failed start.
    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConfirmOnly;

    #[async_trait]
    impl Provider for ConfirmOnly {
        fn identifier(&self) -> &str {
            "confirm-only"
        }

        async fn fetch_messages(&self) -> Result<Vec<RawMessage>> {
            Ok(vec![RawMessage::new("1", "body")])
        }

        async fn confirm_message(&self, _message: &RawMessage) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_lifecycle_and_release_are_no_ops() {
        let provider = ConfirmOnly;
        provider.start().await.unwrap();

        let messages = provider.fetch_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        provider.message_not_processed(&messages[0]).await.unwrap();

        provider.stop().await;
    }
}
