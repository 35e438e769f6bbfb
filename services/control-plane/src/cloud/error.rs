//! Cloud collaborator error types.

use thiserror::Error;

/// Errors surfaced by the cloud collaborator traits.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The underlying transport to the cloud API failed.
    #[error("cloud transport failure: {0}")]
    Transport(String),

    /// The referenced queue does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The referenced topic subscription does not exist.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The receipt handle does not match an in-flight message.
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),
}
