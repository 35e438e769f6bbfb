//! # vdesk-events
//!
//! Notification wire format and event types for the vdesk platform.
//!
//! ## Design Principles
//!
//! - Upstream notifications arrive double-encoded: the topic wraps the
//!   original notification in an outer JSON envelope whose `Message` field
//!   holds the payload as a string
//! - Decoding is total over untrusted input: every malformed level maps to
//!   a typed [`EventError`] so the consumer can drop the message without
//!   retrying it
//! - Only notifications carrying the instance state-change discriminator
//!   are interpreted further; everything else is ignored by type
//!
//! ## Outbound Events
//!
//! [`StateChangeEvent`] is the single event shape pushed to live client
//! streams: `{desktop_id, state, instance_id}`.

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
