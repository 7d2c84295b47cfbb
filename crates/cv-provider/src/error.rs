use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message {0} has no receipt handle")]
    MissingReceiptHandle(String),

    #[error("AWS SQS error: {0}")]
    Sqs(String),

    #[error("Provider is stopped")]
    Stopped,

    #[error("Configuration error: {0}")]
    Config(String),
}
