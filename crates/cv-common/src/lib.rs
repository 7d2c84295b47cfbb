use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub mod logging;

// ============================================================================
// Core Message Types
// ============================================================================

/// Translation metadata attached to a message's content.
pub type Metadata = serde_json::Map<String, Value>;

/// A message as received from a provider.
///
/// The dispatcher moves this value from the fetch loop to a worker and hands a
/// reference to the same value back to the provider when acknowledging it.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub body: String,
    /// Broker handle used to acknowledge or release the message
    #[serde(default)]
    pub receipt_handle: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// How many times the broker has delivered this message (1 on first delivery)
    #[serde(default)]
    pub receive_count: u32,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt_handle: None,
            attributes: HashMap::new(),
            receive_count: 1,
        }
    }

    pub fn with_receipt_handle(mut self, receipt_handle: impl Into<String>) -> Self {
        self.receipt_handle = Some(receipt_handle.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// A message with no body carries nothing a handler could act on.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Content and metadata produced from a [`RawMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedMessage {
    pub content: Value,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TranslatedMessage {
    pub fn new(content: Value, metadata: Metadata) -> Self {
        Self { content, metadata }
    }

    /// Default translation: the raw body becomes the content, metadata is empty.
    pub fn from_raw(raw: &RawMessage) -> Self {
        Self {
            content: Value::String(raw.body.clone()),
            metadata: Metadata::new(),
        }
    }

    /// False for null, `false`, empty strings, empty arrays and empty objects.
    pub fn has_content(&self) -> bool {
        match &self.content {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::Number(_) => true,
        }
    }
}

// ============================================================================
// Delivery Outcomes
// ============================================================================

/// What should happen to a message once its handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Processed: acknowledge (delete) the message
    Confirm,
    /// Not processed: release it for redelivery
    NotProcessed,
    /// Drop the message without processing it; acknowledged like `Confirm`
    Delete,
}

impl Outcome {
    /// Whether the provider should acknowledge the message.
    pub fn acknowledges(self) -> bool {
        matches!(self, Outcome::Confirm | Outcome::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Confirm => "confirmed",
            Outcome::NotProcessed => "not_processed",
            Outcome::Delete => "deleted",
        }
    }
}

impl From<bool> for Outcome {
    fn from(processed: bool) -> Self {
        if processed {
            Outcome::Confirm
        } else {
            Outcome::NotProcessed
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_message_builder() {
        let msg = RawMessage::new("m-1", "hello")
            .with_receipt_handle("rh-1")
            .with_attribute("source", "orders")
            .with_receive_count(3);

        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.receipt_handle.as_deref(), Some("rh-1"));
        assert_eq!(msg.attributes.get("source").map(String::as_str), Some("orders"));
        assert_eq!(msg.receive_count, 3);
        assert!(!msg.is_empty());
        assert!(RawMessage::new("m-2", "").is_empty());
    }

    #[test]
    fn test_default_translation_wraps_body() {
        let msg = RawMessage::new("m-1", "payload");
        let translated = TranslatedMessage::from_raw(&msg);

        assert_eq!(translated.content, json!("payload"));
        assert!(translated.metadata.is_empty());
    }

    #[test]
    fn test_has_content() {
        let empty = [json!(null), json!(false), json!(""), json!([]), json!({})];
        for content in empty {
            assert!(!TranslatedMessage::new(content.clone(), Metadata::new()).has_content(), "{content}");
        }

        let present = [json!(0), json!(true), json!("x"), json!([1]), json!({"a": 1})];
        for content in present {
            assert!(TranslatedMessage::new(content.clone(), Metadata::new()).has_content(), "{content}");
        }
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(Outcome::from(true), Outcome::Confirm);
        assert_eq!(Outcome::from(false), Outcome::NotProcessed);
        assert!(Outcome::Delete.acknowledges());
        assert!(!Outcome::NotProcessed.acknowledges());
        assert_eq!(Outcome::Delete.to_string(), "deleted");
    }
}
