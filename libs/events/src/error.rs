//! Error types for notification decoding.

use thiserror::Error;

/// Errors that can occur when decoding an upstream notification.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The outer queue envelope is not valid JSON or is missing its
    /// `Message` field.
    #[error("malformed queue envelope: {0}")]
    MalformedEnvelope(String),

    /// The nested notification payload is not valid JSON.
    #[error("malformed notification payload: {0}")]
    MalformedPayload(String),

    /// The state-change detail block is missing or incomplete.
    #[error("malformed state-change detail: {0}")]
    MalformedDetail(String),

    /// The notification carries a discriminator this system does not
    /// interpret.
    #[error("not a state-change notification: {0}")]
    UnexpectedType(String),
}
