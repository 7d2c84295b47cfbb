//! Translators turn a provider's raw message into handler content and metadata.

use serde_json::Value;
use thiserror::Error;

use cv_common::{Metadata, RawMessage, TranslatedMessage};

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Translator {translator} produced empty content for message {message_id}")]
    EmptyContent {
        translator: String,
        message_id: String,
    },
}

/// Maps a raw message to `{content, metadata}`.
///
/// Translation must be pure: the same message always translates to the same value.
pub trait Translator: Send + Sync {
    fn translate(&self, message: &RawMessage) -> Result<TranslatedMessage, TranslateError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Parses the body as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranslator;

impl Translator for JsonTranslator {
    fn translate(&self, message: &RawMessage) -> Result<TranslatedMessage, TranslateError> {
        let content: Value = serde_json::from_str(&message.body)?;

        let mut metadata = Metadata::new();
        metadata.insert("message_id".to_string(), Value::String(message.id.clone()));
        metadata.insert("receive_count".to_string(), Value::from(message.receive_count));
        if !message.attributes.is_empty() {
            let attributes = message
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            metadata.insert("attributes".to_string(), Value::Object(attributes));
        }

        Ok(TranslatedMessage::new(content, metadata))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Unwraps an SNS notification delivered through an SQS subscription.
///
/// The `Message` field becomes the content (parsed as JSON when possible); the
/// other envelope fields (`TopicArn`, `MessageId`, `Timestamp`, ...) become metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnsTranslator;

impl Translator for SnsTranslator {
    fn translate(&self, message: &RawMessage) -> Result<TranslatedMessage, TranslateError> {
        let envelope: Value = serde_json::from_str(&message.body)?;
        let Value::Object(mut fields) = envelope else {
            return Err(TranslateError::InvalidEnvelope(format!(
                "message {} is not a JSON object",
                message.id
            )));
        };

        let content = match fields.remove("Message") {
            Some(Value::String(inner)) => {
                serde_json::from_str(&inner).unwrap_or(Value::String(inner))
            }
            Some(other) => other,
            None => {
                return Err(TranslateError::InvalidEnvelope(format!(
                    "message {} has no Message field",
                    message.id
                )))
            }
        };

        Ok(TranslatedMessage::new(content, fields))
    }

    fn name(&self) -> &'static str {
        "sns"
    }
}
